//! GPT decoder: embeddings, pre-norm blocks, final norm and LM head
//!
//! Architecture per block:
//! - LayerNorm -> causal self-attention (fused QKV) -> residual
//! - LayerNorm -> MLP (4x expansion, tanh GELU) -> residual
//!
//! All sub-modules are public so the capture harness can replay each stage
//! against the exact same weights.

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Embedding, LayerNorm, Linear, Module};

use super::weights::WeightMap;
use crate::config::GptConfig;
use crate::utils::tensor_utils::causal_mask_buffer;

const LAYER_NORM_EPS: f64 = 1e-5;

/// Typed access into a weight map with shape checking
struct ParamSource<'a> {
    weights: &'a WeightMap,
    device: &'a Device,
}

impl<'a> ParamSource<'a> {
    fn get(&self, name: &str, shape: &[usize]) -> Result<Tensor> {
        let tensor = self
            .weights
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Missing weight: {}", name))?;
        if tensor.dims() != shape {
            anyhow::bail!(
                "Weight {} has shape {:?}, expected {:?}",
                name,
                tensor.dims(),
                shape
            );
        }
        Ok(tensor.to_dtype(DType::F32)?.to_device(self.device)?)
    }

    fn linear(&self, prefix: &str, in_dim: usize, out_dim: usize) -> Result<Linear> {
        let weight = self.get(&format!("{}.weight", prefix), &[out_dim, in_dim])?;
        let bias = self.get(&format!("{}.bias", prefix), &[out_dim])?;
        Ok(Linear::new(weight, Some(bias)))
    }

    fn linear_no_bias(&self, prefix: &str, in_dim: usize, out_dim: usize) -> Result<Linear> {
        let weight = self.get(&format!("{}.weight", prefix), &[out_dim, in_dim])?;
        Ok(Linear::new(weight, None))
    }

    fn norm(&self, prefix: &str, dim: usize) -> Result<Norm> {
        let weight = self.get(&format!("{}.weight", prefix), &[dim])?;
        let bias = self.get(&format!("{}.bias", prefix), &[dim])?;
        Ok(Norm::new(weight, bias))
    }

    fn embedding(&self, prefix: &str, count: usize, dim: usize) -> Result<Embedding> {
        let weight = self.get(&format!("{}.weight", prefix), &[count, dim])?;
        Ok(Embedding::new(weight, dim))
    }
}

/// LayerNorm that keeps its parameters reachable for export
pub struct Norm {
    weight: Tensor,
    bias: Tensor,
    inner: LayerNorm,
}

impl Norm {
    fn new(weight: Tensor, bias: Tensor) -> Self {
        let inner = LayerNorm::new(weight.clone(), bias.clone(), LAYER_NORM_EPS);
        Self {
            weight,
            bias,
            inner,
        }
    }

    /// Normalize over the last dimension
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.inner.forward(x).map_err(Into::into)
    }
}

fn push_linear(out: &mut Vec<(String, Tensor)>, prefix: &str, linear: &Linear) {
    out.push((format!("{}.weight", prefix), linear.weight().clone()));
    if let Some(bias) = linear.bias() {
        out.push((format!("{}.bias", prefix), bias.clone()));
    }
}

fn push_norm(out: &mut Vec<(String, Tensor)>, prefix: &str, norm: &Norm) {
    out.push((format!("{}.weight", prefix), norm.weight.clone()));
    out.push((format!("{}.bias", prefix), norm.bias.clone()));
}

/// Multi-head causal self-attention with a fused QKV projection
pub struct CausalSelfAttention {
    /// Fused query/key/value projection (n_embd -> 3 * n_embd)
    pub c_attn: Linear,
    /// Output projection
    pub c_proj: Linear,
    /// Lower-triangular mask buffer (1, 1, block_size, block_size)
    pub bias: Tensor,
    /// Attention heads
    pub n_head: usize,
    /// Embedding width
    pub n_embd: usize,
}

impl CausalSelfAttention {
    fn load(params: &ParamSource, prefix: &str, config: &GptConfig) -> Result<Self> {
        let n_embd = config.n_embd;
        let bs = config.block_size;
        let bias_name = format!("{}.bias", prefix);

        let bias = if params.weights.contains_key(&bias_name) {
            params.get(&bias_name, &[1, 1, bs, bs])?
        } else {
            tracing::debug!("{} not in weights, using causal mask", bias_name);
            causal_mask_buffer(bs, params.device)?
        };

        Ok(Self {
            c_attn: params.linear(&format!("{}.c_attn", prefix), n_embd, 3 * n_embd)?,
            c_proj: params.linear(&format!("{}.c_proj", prefix), n_embd, n_embd)?,
            bias,
            n_head: config.n_head,
            n_embd,
        })
    }

    /// Width of a single head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Forward pass: (B, T, C) -> (B, T, C)
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let hs = c / self.n_head;

        let qkv = self.c_attn.forward(x)?;
        let q = qkv.narrow(2, 0, c)?;
        let k = qkv.narrow(2, c, c)?;
        let v = qkv.narrow(2, 2 * c, c)?;

        // (B, T, C) -> (B, nh, T, hs)
        let k = k.reshape((b, t, self.n_head, hs))?.transpose(1, 2)?.contiguous()?;
        let q = q.reshape((b, t, self.n_head, hs))?.transpose(1, 2)?.contiguous()?;
        let v = v.reshape((b, t, self.n_head, hs))?.transpose(1, 2)?.contiguous()?;

        let att = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * (1.0 / (hs as f64).sqrt()))?;

        let mask = self.bias.i((.., .., ..t, ..t))?.ne(0f32)?.broadcast_as(att.shape())?;
        let neg_inf = Tensor::new(f32::NEG_INFINITY, x.device())?.broadcast_as(att.shape())?;
        let att = mask.where_cond(&att, &neg_inf)?;
        let att = candle_nn::ops::softmax(&att, D::Minus1)?;

        let y = att.matmul(&v)?;
        let y = y.transpose(1, 2)?.reshape((b, t, c))?;

        self.c_proj.forward(&y).map_err(Into::into)
    }
}

/// Feed-forward sub-layer
pub struct Mlp {
    /// Expansion (n_embd -> 4 * n_embd)
    pub c_fc: Linear,
    /// Projection back (4 * n_embd -> n_embd)
    pub c_proj: Linear,
}

impl Mlp {
    fn load(params: &ParamSource, prefix: &str, n_embd: usize) -> Result<Self> {
        Ok(Self {
            c_fc: params.linear(&format!("{}.c_fc", prefix), n_embd, 4 * n_embd)?,
            c_proj: params.linear(&format!("{}.c_proj", prefix), 4 * n_embd, n_embd)?,
        })
    }

    /// c_fc -> tanh GELU -> c_proj
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.c_fc.forward(x)?;
        let x = x.gelu()?;
        self.c_proj.forward(&x).map_err(Into::into)
    }
}

/// One transformer layer
pub struct Block {
    /// Pre-attention norm
    pub ln_1: Norm,
    /// Causal self-attention
    pub attn: CausalSelfAttention,
    /// Pre-MLP norm
    pub ln_2: Norm,
    /// Feed-forward
    pub mlp: Mlp,
}

impl Block {
    fn load(params: &ParamSource, prefix: &str, config: &GptConfig) -> Result<Self> {
        Ok(Self {
            ln_1: params.norm(&format!("{}.ln_1", prefix), config.n_embd)?,
            attn: CausalSelfAttention::load(params, &format!("{}.attn", prefix), config)?,
            ln_2: params.norm(&format!("{}.ln_2", prefix), config.n_embd)?,
            mlp: Mlp::load(params, &format!("{}.mlp", prefix), config.n_embd)?,
        })
    }

    /// Forward pass with both residual connections
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = (x + self.attn.forward(&self.ln_1.forward(x)?)?)?;
        let x = (&x + self.mlp.forward(&self.ln_2.forward(&x)?)?)?;
        Ok(x)
    }

    fn collect_parameters(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        push_norm(out, &format!("{}.ln_1", prefix), &self.ln_1);
        out.push((format!("{}.attn.bias", prefix), self.attn.bias.clone()));
        push_linear(out, &format!("{}.attn.c_attn", prefix), &self.attn.c_attn);
        push_linear(out, &format!("{}.attn.c_proj", prefix), &self.attn.c_proj);
        push_norm(out, &format!("{}.ln_2", prefix), &self.ln_2);
        push_linear(out, &format!("{}.mlp.c_fc", prefix), &self.mlp.c_fc);
        push_linear(out, &format!("{}.mlp.c_proj", prefix), &self.mlp.c_proj);
    }
}

/// GPT language model
pub struct Gpt {
    config: GptConfig,
    device: Device,
    /// Token embedding (vocab_size, n_embd)
    pub wte: Embedding,
    /// Position embedding (block_size, n_embd)
    pub wpe: Embedding,
    /// Transformer blocks
    pub blocks: Vec<Block>,
    /// Final layer norm
    pub ln_f: Norm,
    /// Output projection to vocabulary logits
    pub lm_head: Linear,
}

impl Gpt {
    /// Build the model from named weights
    pub fn from_weights(config: GptConfig, weights: &WeightMap, device: &Device) -> Result<Self> {
        config.validate()?;
        let params = ParamSource { weights, device };

        let wte = params.embedding("transformer.wte", config.vocab_size, config.n_embd)?;
        let wpe = params.embedding("transformer.wpe", config.block_size, config.n_embd)?;

        let blocks = (0..config.n_layer)
            .map(|i| {
                Block::load(&params, &format!("transformer.h.{}", i), &config)
                    .with_context(|| format!("Failed to load block {}", i))
            })
            .collect::<Result<Vec<_>>>()?;

        let ln_f = params.norm("transformer.ln_f", config.n_embd)?;
        let lm_head = params.linear_no_bias("lm_head", config.n_embd, config.vocab_size)?;

        Ok(Self {
            config,
            device: device.clone(),
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
        })
    }

    /// Model hyperparameters
    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    /// Device the weights live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Position indices 0..t as a (1, t) tensor
    pub fn positions(&self, t: usize) -> Result<Tensor> {
        Tensor::arange(0u32, t as u32, &self.device)?
            .unsqueeze(0)
            .map_err(Into::into)
    }

    /// Full forward pass: (B, T) token ids -> (B, T, vocab_size) logits
    pub fn forward(&self, idx: &Tensor) -> Result<Tensor> {
        let (_b, t) = idx.dims2()?;
        if t > self.config.block_size {
            anyhow::bail!(
                "Cannot forward sequence of length {}, block size is only {}",
                t,
                self.config.block_size
            );
        }

        let pos = self.positions(t)?;
        let tok_emb = self.wte.forward(idx)?;
        let pos_emb = self.wpe.forward(&pos)?;
        let mut x = tok_emb.broadcast_add(&pos_emb)?;

        for block in &self.blocks {
            x = block.forward(&x)?;
        }

        let x = self.ln_f.forward(&x)?;
        self.lm_head.forward(&x).map_err(Into::into)
    }

    /// Every parameter and persistent buffer in state-dict order
    pub fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        out.push(("transformer.wte.weight".to_string(), self.wte.embeddings().clone()));
        out.push(("transformer.wpe.weight".to_string(), self.wpe.embeddings().clone()));
        for (i, block) in self.blocks.iter().enumerate() {
            block.collect_parameters(&format!("transformer.h.{}", i), &mut out);
        }
        push_norm(&mut out, "transformer.ln_f", &self.ln_f);
        push_linear(&mut out, "lm_head", &self.lm_head);
        out
    }

    /// Trainable parameter count of the transformer body (no mask buffers, no LM head)
    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .filter(|(name, _)| !name.ends_with(".attn.bias") && name != "lm_head.weight")
            .map(|(_, t)| t.elem_count())
            .sum()
    }
}
