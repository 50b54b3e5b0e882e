//! Single-tensor JSON records

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{DType, Device, Shape, Tensor};
use serde::{Deserialize, Serialize};

/// Encoded tensor: shape, element type name, base64 payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorJson {
    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,
    /// Element type, e.g. `torch.float32`
    pub dtype: String,
    /// Standard base64 of the row-major little-endian bytes
    pub data: String,
}

impl TensorJson {
    /// Number of elements implied by the shape
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Name written into the `dtype` field, following the consumer's
/// `torch.<type>` convention
pub fn dtype_name(dtype: DType) -> Result<&'static str> {
    let name = match dtype {
        DType::F32 => "torch.float32",
        DType::F64 => "torch.float64",
        DType::I64 => "torch.int64",
        DType::U32 => "torch.uint32",
        DType::U8 => "torch.uint8",
        other => anyhow::bail!("Unsupported dtype for JSON encoding: {:?}", other),
    };
    Ok(name)
}

/// Inverse of [`dtype_name`]
pub fn parse_dtype_name(name: &str) -> Result<DType> {
    let dtype = match name {
        "torch.float32" => DType::F32,
        "torch.float64" => DType::F64,
        "torch.int64" => DType::I64,
        "torch.uint32" => DType::U32,
        "torch.uint8" => DType::U8,
        other => anyhow::bail!("Unsupported dtype name: {}", other),
    };
    Ok(dtype)
}

/// Raw little-endian bytes of a tensor in row-major order
fn tensor_bytes(tensor: &Tensor) -> Result<Vec<u8>> {
    let flat = tensor.flatten_all()?;
    let bytes = match tensor.dtype() {
        DType::F32 => flat
            .to_vec1::<f32>()?
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DType::F64 => flat
            .to_vec1::<f64>()?
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DType::I64 => flat
            .to_vec1::<i64>()?
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DType::U32 => flat
            .to_vec1::<u32>()?
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect(),
        DType::U8 => flat.to_vec1::<u8>()?,
        other => anyhow::bail!("Unsupported dtype for JSON encoding: {:?}", other),
    };
    Ok(bytes)
}

/// Encode a tensor into a JSON record
pub fn encode_tensor(tensor: &Tensor) -> Result<TensorJson> {
    let dtype = dtype_name(tensor.dtype())?;
    let bytes = tensor_bytes(tensor)?;

    Ok(TensorJson {
        shape: tensor.dims().to_vec(),
        dtype: dtype.to_string(),
        data: STANDARD.encode(bytes),
    })
}

/// Decode a JSON record back into a tensor
pub fn decode_tensor(record: &TensorJson, device: &Device) -> Result<Tensor> {
    let dtype = parse_dtype_name(&record.dtype)?;
    let bytes = STANDARD
        .decode(record.data.as_bytes())
        .context("Invalid base64 tensor payload")?;

    let expected = record.elem_count() * dtype.size_in_bytes();
    if bytes.len() != expected {
        anyhow::bail!(
            "Tensor payload has {} bytes, shape {:?} of {} needs {}",
            bytes.len(),
            record.shape,
            record.dtype,
            expected
        );
    }

    let shape = Shape::from_dims(&record.shape);
    let tensor = match dtype {
        DType::F32 => {
            let values: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Tensor::from_vec(values, shape, device)?
        }
        DType::F64 => {
            let values: Vec<f64> = bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect();
            Tensor::from_vec(values, shape, device)?
        }
        DType::I64 => {
            let values: Vec<i64> = bytes
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect();
            Tensor::from_vec(values, shape, device)?
        }
        DType::U32 => {
            let values: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Tensor::from_vec(values, shape, device)?
        }
        DType::U8 => Tensor::from_vec(bytes, shape, device)?,
        other => anyhow::bail!("Unsupported dtype for JSON decoding: {:?}", other),
    };
    Ok(tensor)
}
