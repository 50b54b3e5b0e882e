//! Weight sources for the GPT model
//!
//! Weights arrive as a flat name -> tensor map, either from a safetensors
//! checkpoint, from a previously written model fixture, or from a seeded
//! initialisation that follows the reference GPT init scheme.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::path::Path;

use crate::codec::TensorFixture;
use crate::config::GptConfig;
use crate::utils::tensor_utils::causal_mask_buffer;

/// Named weights, keyed by dotted parameter path
pub type WeightMap = HashMap<String, Tensor>;

/// How a parameter is initialised when no checkpoint is given
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    /// N(0, std)
    Normal(f32),
    /// All zeros
    Zeros,
    /// All ones
    Ones,
    /// Lower-triangular attention mask buffer
    CausalMask,
}

/// Name, shape and init rule of one parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Dotted state-dict key
    pub name: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Init rule for seeded weights
    pub init: ParamInit,
}

impl ParamSpec {
    fn new(name: String, shape: Vec<usize>, init: ParamInit) -> Self {
        Self { name, shape, init }
    }

    /// Buffers are carried with the weights but are not learned
    pub fn is_buffer(&self) -> bool {
        self.init == ParamInit::CausalMask
    }
}

const INIT_STD: f32 = 0.02;

/// All parameters of a model with this config, in state-dict order
pub fn parameter_specs(config: &GptConfig) -> Vec<ParamSpec> {
    let c = config.n_embd;
    let bs = config.block_size;
    // residual projections are scaled down by depth
    let proj_std = INIT_STD / (2.0 * config.n_layer as f32).sqrt();

    let mut specs = vec![
        ParamSpec::new(
            "transformer.wte.weight".to_string(),
            vec![config.vocab_size, c],
            ParamInit::Normal(INIT_STD),
        ),
        ParamSpec::new(
            "transformer.wpe.weight".to_string(),
            vec![bs, c],
            ParamInit::Normal(INIT_STD),
        ),
    ];

    for i in 0..config.n_layer {
        let p = format!("transformer.h.{}", i);
        specs.extend([
            ParamSpec::new(format!("{}.ln_1.weight", p), vec![c], ParamInit::Ones),
            ParamSpec::new(format!("{}.ln_1.bias", p), vec![c], ParamInit::Zeros),
            ParamSpec::new(format!("{}.attn.bias", p), vec![1, 1, bs, bs], ParamInit::CausalMask),
            ParamSpec::new(
                format!("{}.attn.c_attn.weight", p),
                vec![3 * c, c],
                ParamInit::Normal(INIT_STD),
            ),
            ParamSpec::new(format!("{}.attn.c_attn.bias", p), vec![3 * c], ParamInit::Zeros),
            ParamSpec::new(
                format!("{}.attn.c_proj.weight", p),
                vec![c, c],
                ParamInit::Normal(proj_std),
            ),
            ParamSpec::new(format!("{}.attn.c_proj.bias", p), vec![c], ParamInit::Zeros),
            ParamSpec::new(format!("{}.ln_2.weight", p), vec![c], ParamInit::Ones),
            ParamSpec::new(format!("{}.ln_2.bias", p), vec![c], ParamInit::Zeros),
            ParamSpec::new(
                format!("{}.mlp.c_fc.weight", p),
                vec![4 * c, c],
                ParamInit::Normal(INIT_STD),
            ),
            ParamSpec::new(format!("{}.mlp.c_fc.bias", p), vec![4 * c], ParamInit::Zeros),
            ParamSpec::new(
                format!("{}.mlp.c_proj.weight", p),
                vec![c, 4 * c],
                ParamInit::Normal(proj_std),
            ),
            ParamSpec::new(format!("{}.mlp.c_proj.bias", p), vec![c], ParamInit::Zeros),
        ]);
    }

    specs.extend([
        ParamSpec::new("transformer.ln_f.weight".to_string(), vec![c], ParamInit::Ones),
        ParamSpec::new("transformer.ln_f.bias".to_string(), vec![c], ParamInit::Zeros),
        ParamSpec::new(
            "lm_head.weight".to_string(),
            vec![config.vocab_size, c],
            ParamInit::Normal(INIT_STD),
        ),
    ]);

    specs
}

/// Seeded initialisation
///
/// Parameters are drawn in state-dict order from the given generator, so the
/// same seed always yields the same weights.
pub fn init_random(config: &GptConfig, rng: &mut StdRng, device: &Device) -> Result<WeightMap> {
    config.validate()?;
    let mut weights = WeightMap::new();

    for spec in parameter_specs(config) {
        let count: usize = spec.shape.iter().product();
        let tensor = match spec.init {
            ParamInit::Normal(std) => {
                let normal = Normal::new(0.0f32, std)
                    .map_err(|e| anyhow::anyhow!("Invalid init std {} for {}: {}", std, spec.name, e))?;
                let values: Vec<f32> = (0..count).map(|_| normal.sample(&mut *rng)).collect();
                Tensor::from_vec(values, spec.shape.as_slice(), device)?
            }
            ParamInit::Zeros => Tensor::zeros(spec.shape.as_slice(), candle_core::DType::F32, device)?,
            ParamInit::Ones => Tensor::ones(spec.shape.as_slice(), candle_core::DType::F32, device)?,
            ParamInit::CausalMask => causal_mask_buffer(config.block_size, device)?,
        };
        weights.insert(spec.name, tensor);
    }

    Ok(weights)
}

/// Load weights from `.safetensors` or a model fixture `.json`
pub fn load_weights<P: AsRef<Path>>(path: P, device: &Device) -> Result<WeightMap> {
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!("Weight file not found: {:?}", path);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "safetensors" => candle_core::safetensors::load(path, device)
            .with_context(|| format!("Failed to load safetensors {:?}", path)),
        "json" => {
            let fixture = TensorFixture::load(path)?;
            Ok(fixture.tensors(device)?.into_iter().collect())
        }
        other => anyhow::bail!(
            "Unsupported weight format {:?} for {:?} (expected .safetensors or .json)",
            other,
            path
        ),
    }
}
