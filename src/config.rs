//! Model and fixture configuration
//!
//! `GptConfig` mirrors the hyperparameter record the consuming test suite
//! reads from the `config` entry of every fixture file, so its field order
//! is part of the on-disk format. `FixtureConfig` holds everything a single
//! deterministic generator run needs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Named architecture presets: (n_layer, n_head, n_embd)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// `openai-gpt`
    OpenAiGpt,
    /// `gpt2`
    Gpt2,
    /// `gpt2-medium`
    Gpt2Medium,
    /// `gpt2-large`
    Gpt2Large,
    /// `gpt2-xl`
    Gpt2Xl,
    /// `gopher-44m`
    Gopher44m,
    /// `gpt-mini`
    GptMini,
    /// `gpt-micro`
    GptMicro,
    /// `gpt-nano`
    GptNano,
}

impl ModelType {
    /// All presets, smallest last
    pub const ALL: [ModelType; 9] = [
        ModelType::OpenAiGpt,
        ModelType::Gpt2,
        ModelType::Gpt2Medium,
        ModelType::Gpt2Large,
        ModelType::Gpt2Xl,
        ModelType::Gopher44m,
        ModelType::GptMini,
        ModelType::GptMicro,
        ModelType::GptNano,
    ];

    /// Parse a model-type tag such as `gpt-nano`
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// The tag written into fixture configs
    pub fn tag(&self) -> &'static str {
        match self {
            ModelType::OpenAiGpt => "openai-gpt",
            ModelType::Gpt2 => "gpt2",
            ModelType::Gpt2Medium => "gpt2-medium",
            ModelType::Gpt2Large => "gpt2-large",
            ModelType::Gpt2Xl => "gpt2-xl",
            ModelType::Gopher44m => "gopher-44m",
            ModelType::GptMini => "gpt-mini",
            ModelType::GptMicro => "gpt-micro",
            ModelType::GptNano => "gpt-nano",
        }
    }

    /// (n_layer, n_head, n_embd)
    pub fn dims(&self) -> (usize, usize, usize) {
        match self {
            ModelType::OpenAiGpt => (12, 12, 768),
            ModelType::Gpt2 => (12, 12, 768),
            ModelType::Gpt2Medium => (24, 16, 1024),
            ModelType::Gpt2Large => (36, 20, 1280),
            ModelType::Gpt2Xl => (48, 25, 1600),
            ModelType::Gopher44m => (8, 16, 512),
            ModelType::GptMini => (6, 6, 192),
            ModelType::GptMicro => (4, 4, 128),
            ModelType::GptNano => (3, 3, 48),
        }
    }
}

/// Tag used for models whose dimensions are given explicitly
pub const CUSTOM_MODEL_TYPE: &str = "gpt";

fn default_pdrop() -> f64 {
    0.1
}

/// GPT hyperparameters
///
/// Serialized field order matches the reference config dict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptConfig {
    /// Preset tag, or `gpt` for explicit dimensions
    pub model_type: String,
    /// Transformer blocks
    pub n_layer: usize,
    /// Attention heads per block
    pub n_head: usize,
    /// Embedding width
    pub n_embd: usize,
    /// Token vocabulary size
    pub vocab_size: usize,
    /// Maximum (and fixture) sequence length
    pub block_size: usize,
    /// Embedding dropout; recorded only, inference never drops
    #[serde(default = "default_pdrop")]
    pub embd_pdrop: f64,
    /// Residual dropout; recorded only
    #[serde(default = "default_pdrop")]
    pub resid_pdrop: f64,
    /// Attention dropout; recorded only
    #[serde(default = "default_pdrop")]
    pub attn_pdrop: f64,
}

impl GptConfig {
    /// Build a config from a preset tag
    pub fn from_model_type(tag: &str, vocab_size: usize, block_size: usize) -> Result<Self> {
        let model_type = ModelType::from_tag(tag)
            .ok_or_else(|| anyhow::anyhow!("Unknown model type: {}", tag))?;
        let (n_layer, n_head, n_embd) = model_type.dims();

        Ok(Self {
            model_type: model_type.tag().to_string(),
            n_layer,
            n_head,
            n_embd,
            vocab_size,
            block_size,
            embd_pdrop: default_pdrop(),
            resid_pdrop: default_pdrop(),
            attn_pdrop: default_pdrop(),
        })
    }

    /// Build a config with explicit dimensions
    pub fn custom(
        n_layer: usize,
        n_head: usize,
        n_embd: usize,
        vocab_size: usize,
        block_size: usize,
    ) -> Self {
        Self {
            model_type: CUSTOM_MODEL_TYPE.to_string(),
            n_layer,
            n_head,
            n_embd,
            vocab_size,
            block_size,
            embd_pdrop: default_pdrop(),
            resid_pdrop: default_pdrop(),
            attn_pdrop: default_pdrop(),
        }
    }

    /// The sorting-task model the fixtures are generated from
    pub fn gpt_nano_sort() -> Self {
        let (n_layer, n_head, n_embd) = ModelType::GptNano.dims();
        Self {
            model_type: ModelType::GptNano.tag().to_string(),
            n_layer,
            n_head,
            n_embd,
            vocab_size: 3,
            block_size: 11,
            embd_pdrop: default_pdrop(),
            resid_pdrop: default_pdrop(),
            attn_pdrop: default_pdrop(),
        }
    }

    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the dimensions describe a buildable model
    pub fn validate(&self) -> Result<()> {
        if self.n_layer == 0 || self.n_head == 0 || self.n_embd == 0 {
            anyhow::bail!(
                "Model dimensions must be non-zero (n_layer={}, n_head={}, n_embd={})",
                self.n_layer,
                self.n_head,
                self.n_embd
            );
        }
        if self.vocab_size == 0 || self.block_size == 0 {
            anyhow::bail!(
                "vocab_size and block_size must be non-zero (vocab_size={}, block_size={})",
                self.vocab_size,
                self.block_size
            );
        }
        if self.n_embd % self.n_head != 0 {
            anyhow::bail!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd,
                self.n_head
            );
        }

        if self.model_type != CUSTOM_MODEL_TYPE {
            let preset = ModelType::from_tag(&self.model_type)
                .ok_or_else(|| anyhow::anyhow!("Unknown model type: {}", self.model_type))?;
            let dims = (self.n_layer, self.n_head, self.n_embd);
            if preset.dims() != dims {
                anyhow::bail!(
                    "Model type {} implies (n_layer, n_head, n_embd) = {:?}, config has {:?}",
                    self.model_type,
                    preset.dims(),
                    dims
                );
            }
        }
        Ok(())
    }

    /// Width of a single attention head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

/// Settings for one fixture generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Model hyperparameters
    pub model: GptConfig,
    /// Number of input rows
    pub batch_size: usize,
    /// Seed for weight initialisation
    pub seed: u64,
    /// Seed for the random input rows
    pub input_seed: u64,
    /// Hand-chosen first input row
    pub literal_row: Vec<u32>,
    /// Random tokens at the start of each generated row; the rest is zero
    pub random_prefix_len: usize,
    /// Pretrained weights (`.safetensors` or a model fixture `.json`)
    pub weights: PathBuf,
    /// Output path for the parameter fixture
    pub model_out: PathBuf,
    /// Output path for the intermediates fixture
    pub partials_out: PathBuf,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            model: GptConfig::gpt_nano_sort(),
            batch_size: 3,
            seed: 3407,
            input_seed: 34,
            literal_row: vec![0, 0, 2, 1, 0, 1, 0, 0, 0, 0, 0],
            random_prefix_len: 6,
            weights: PathBuf::from("mingpt/model.safetensors"),
            model_out: PathBuf::from("public/gpt-nano-sort-model.json"),
            partials_out: PathBuf::from("public/gpt-nano-sort-t0-partials.json"),
        }
    }
}

impl FixtureConfig {
    /// Load from a YAML file; missing keys fall back to the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture config: {:?}", path))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse fixture config: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the model config and the input layout
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.random_prefix_len > self.model.block_size {
            anyhow::bail!(
                "random_prefix_len ({}) exceeds block_size ({})",
                self.random_prefix_len,
                self.model.block_size
            );
        }
        Ok(())
    }
}
