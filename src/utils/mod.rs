//! Utility functions and helpers
//!
//! This module provides common utilities used across the crate.

/// Tensor utilities
pub mod tensor_utils {
    use candle_core::{DType, Device, Result, Tensor, D};

    /// Create a causal mask as u8 tensor (1 = attend, 0 = mask)
    ///
    /// For autoregressive generation, position i can attend to positions <= i
    pub fn create_causal_mask_u8(
        query_len: usize,
        key_len: usize,
        device: &Device,
    ) -> Result<Tensor> {
        let start_pos = key_len.saturating_sub(query_len);
        let mut mask_data = vec![0u8; query_len * key_len];

        for q in 0..query_len {
            for k in 0..key_len {
                if k <= (start_pos + q) {
                    mask_data[q * key_len + k] = 1;
                }
            }
        }

        let mask = Tensor::from_slice(&mask_data, (query_len, key_len), device)?;
        mask.unsqueeze(0)?.unsqueeze(0)
    }

    /// Lower-triangular float buffer of shape (1, 1, block_size, block_size)
    ///
    /// This is the `attn.bias` buffer stored alongside the attention weights.
    pub fn causal_mask_buffer(block_size: usize, device: &Device) -> Result<Tensor> {
        create_causal_mask_u8(block_size, block_size, device)?.to_dtype(DType::F32)
    }

    /// Exact element-wise equality, including shape and dtype
    ///
    /// Values are compared in their own dtype with `==`, so NaN never equals
    /// itself and `0.0 == -0.0`.
    pub fn tensors_equal(a: &Tensor, b: &Tensor) -> Result<bool> {
        if a.dims() != b.dims() || a.dtype() != b.dtype() {
            return Ok(false);
        }
        let matching = a
            .eq(b)?
            .to_dtype(DType::U32)?
            .sum_all()?
            .to_scalar::<u32>()?;
        Ok(matching as usize == a.elem_count())
    }

    /// Largest absolute element-wise difference
    pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()
    }

    /// Sum over the last dimension, flattened
    pub fn last_dim_sums(t: &Tensor) -> Result<Vec<f32>> {
        t.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::tensor_utils::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_causal_mask_is_lower_triangular() {
        let device = Device::Cpu;
        let mask = create_causal_mask_u8(4, 4, &device).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 4, 4]);

        let rows = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2::<u8>().unwrap();
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                assert_eq!(v, u8::from(j <= i));
            }
        }
    }

    #[test]
    fn test_causal_mask_offset_for_longer_keys() {
        let device = Device::Cpu;
        let mask = create_causal_mask_u8(1, 3, &device).unwrap();
        let row: Vec<u8> = mask.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(row, vec![1, 1, 1]);
    }

    #[test]
    fn test_causal_mask_buffer() {
        let device = Device::Cpu;
        let buf = causal_mask_buffer(3, &device).unwrap();
        let values: Vec<f32> = buf.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_tensors_equal() {
        let device = Device::Cpu;
        let a = Tensor::new(&[1.0f32, 2.0], &device).unwrap();
        let b = Tensor::new(&[1.0f32, 2.0], &device).unwrap();
        let c = Tensor::new(&[1.0f32, 2.0000002], &device).unwrap();
        let d = Tensor::new(&[[1.0f32, 2.0]], &device).unwrap();

        assert!(tensors_equal(&a, &b).unwrap());
        assert!(!tensors_equal(&a, &c).unwrap());
        assert!(!tensors_equal(&a, &d).unwrap());
        assert!(max_abs_diff(&a, &c).unwrap() > 0.0);
    }

    #[test]
    fn test_tensors_equal_nan_is_never_equal() {
        let device = Device::Cpu;
        let a = Tensor::new(&[f32::NAN, 1.0], &device).unwrap();
        let b = Tensor::new(&[f32::NAN, 1.0], &device).unwrap();
        assert!(!tensors_equal(&a, &b).unwrap());
        assert!(!tensors_equal(&a, &a).unwrap());
    }

    #[test]
    fn test_tensors_equal_signed_zero() {
        let device = Device::Cpu;
        let a = Tensor::new(&[0.0f32, f32::NEG_INFINITY], &device).unwrap();
        let b = Tensor::new(&[-0.0f32, f32::NEG_INFINITY], &device).unwrap();
        assert!(tensors_equal(&a, &b).unwrap());
    }

    #[test]
    fn test_tensors_equal_native_dtype() {
        let device = Device::Cpu;
        // both round to the same f32
        let a = Tensor::new(&[16_777_216i64], &device).unwrap();
        let b = Tensor::new(&[16_777_217i64], &device).unwrap();
        assert!(!tensors_equal(&a, &b).unwrap());

        let c = Tensor::new(&[1.0f64], &device).unwrap();
        let d = Tensor::new(&[1.0f64 + 1e-12], &device).unwrap();
        assert!(!tensors_equal(&c, &d).unwrap());

        let e = Tensor::new(&[1.0f32], &device).unwrap();
        assert!(!tensors_equal(&c, &e).unwrap());
    }
}
