//! Step-by-step replay of the GPT forward pass
//!
//! Each function performs the same tensor operations, in the same order, as
//! the corresponding module's own `forward`, so the replayed results are
//! bit-identical to the model's.

use anyhow::{Context, Result};
use candle_core::{DType, IndexOp, Tensor, D};
use candle_nn::Module;
use tracing::{debug, error, info};

use super::captures::Captures;
use crate::models::gpt::{Block, CausalSelfAttention, Gpt, Mlp};
use crate::utils::tensor_utils::{max_abs_diff, tensors_equal};

/// Output of a full capture run
pub struct CaptureReport {
    /// Every intermediate, in pipeline order
    pub captures: Captures,
    /// Replayed first block equals `Block::forward`
    pub block_matches: bool,
    /// Captured logits equal `Gpt::forward`
    pub logits_match: bool,
}

impl CaptureReport {
    /// True when every self-consistency check passed
    pub fn is_consistent(&self) -> bool {
        self.block_matches && self.logits_match
    }
}

/// Embedding stage: token + position embeddings
///
/// Only sequences of exactly `block_size` tokens are accepted.
pub fn gpt_forward_with_capture(model: &Gpt, idx: &Tensor) -> Result<(Tensor, Captures)> {
    let (_b, t) = idx.dims2().context("Input batch must be (batch, sequence)")?;
    let block_size = model.config().block_size;
    if t != block_size {
        anyhow::bail!(
            "Capture requires sequence length equal to block size {}, got {}",
            block_size,
            t
        );
    }

    let pos = model.positions(t)?;
    let tok_emb = model.wte.forward(idx)?;
    let pos_emb = model.wpe.forward(&pos)?;
    let x = tok_emb.broadcast_add(&pos_emb)?;

    let mut captures = Captures::new();
    captures.insert("idx", idx.to_dtype(DType::F32)?)?;
    captures.insert("tok_emb", tok_emb)?;
    captures.insert("pos_emb", pos_emb)?;
    captures.insert("x", x.clone())?;

    Ok((x, captures))
}

/// Causal self-attention with every partial result exposed
pub fn attention_forward_with_capture(
    attn: &CausalSelfAttention,
    x: &Tensor,
) -> Result<(Tensor, Captures)> {
    let (b, t, c) = x.dims3()?;
    let nh = attn.n_head;
    let hs = c / nh;

    let qkv = attn.c_attn.forward(x)?;
    let q = qkv.narrow(2, 0, c)?;
    let k = qkv.narrow(2, c, c)?;
    let v = qkv.narrow(2, 2 * c, c)?;

    // (B, T, C) -> (B, nh, T, hs)
    let k = k.reshape((b, t, nh, hs))?.transpose(1, 2)?.contiguous()?;
    let q = q.reshape((b, t, nh, hs))?.transpose(1, 2)?.contiguous()?;
    let v = v.reshape((b, t, nh, hs))?.transpose(1, 2)?.contiguous()?;

    // (B, nh, T, hs) x (B, nh, hs, T) -> (B, nh, T, T)
    let att = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * (1.0 / (hs as f64).sqrt()))?;

    let mask = attn.bias.i((.., .., ..t, ..t))?.ne(0f32)?.broadcast_as(att.shape())?;
    let neg_inf = Tensor::new(f32::NEG_INFINITY, x.device())?.broadcast_as(att.shape())?;
    let att = mask.where_cond(&att, &neg_inf)?;
    let att_sm = candle_nn::ops::softmax(&att, D::Minus1)?;

    // (B, nh, T, T) x (B, nh, T, hs) -> (B, nh, T, hs)
    let y_heads = att_sm.matmul(&v)?;
    let y = y_heads.transpose(1, 2)?.reshape((b, t, c))?;
    let y_proj = attn.c_proj.forward(&y)?;

    let mut captures = Captures::new();
    captures.insert("q", q)?;
    captures.insert("k", k)?;
    captures.insert("v", v)?;
    captures.insert("qkv", qkv)?;
    captures.insert("att", att)?;
    captures.insert("attSm", att_sm)?;
    captures.insert("yHeads", y_heads)?;
    captures.insert("y", y)?;
    captures.insert("yProj", y_proj.clone())?;

    Ok((y_proj, captures))
}

/// MLP: expansion, GELU, projection
pub fn mlp_forward_with_capture(mlp: &Mlp, x: &Tensor) -> Result<(Tensor, Captures)> {
    let fc = mlp.c_fc.forward(x)?;
    let gelu = fc.gelu()?;
    let res = mlp.c_proj.forward(&gelu)?;

    let mut captures = Captures::new();
    captures.insert("fc", fc)?;
    captures.insert("gelu", gelu)?;

    Ok((res, captures))
}

/// One transformer block with both residual paths exposed
pub fn block_forward_with_capture(block: &Block, x: &Tensor) -> Result<(Tensor, Captures)> {
    let ln1 = block.ln_1.forward(x)?;
    let (attn, attn_partials) = attention_forward_with_capture(&block.attn, &ln1)?;
    let attn_resid = (x + &attn)?;
    let ln2 = block.ln_2.forward(&attn_resid)?;
    let (mlp, mlp_partials) = mlp_forward_with_capture(&block.mlp, &ln2)?;
    let mlp_resid = (&attn_resid + &mlp)?;

    let mut captures = Captures::new();
    captures.insert("ln1", ln1)?;
    captures.extend(attn_partials)?;
    captures.insert("attnResid", attn_resid)?;
    captures.insert("ln2", ln2)?;
    captures.extend(mlp_partials)?;
    captures.insert("mlp", mlp)?;
    captures.insert("mlpResid", mlp_resid.clone())?;

    Ok((mlp_resid, captures))
}

/// Run the whole pipeline and check the replay against the model
///
/// Mismatches are logged and reported, not returned as errors.
pub fn capture_all(model: &Gpt, idx: &Tensor) -> Result<CaptureReport> {
    let (x, mut captures) = gpt_forward_with_capture(model, idx)?;

    let first = model
        .blocks
        .first()
        .ok_or_else(|| anyhow::anyhow!("Model has no transformer blocks"))?;
    let (replayed, block_partials) = block_forward_with_capture(first, &x)?;
    captures.extend(block_partials)?;

    let reference = first.forward(&x)?;
    let block_matches = tensors_equal(&replayed, &reference)?;
    if block_matches {
        debug!("Replayed block 0 matches the model's block output");
    } else {
        error!(
            "ERROR: test block output does not match model output (max abs diff {:.3e})",
            max_abs_diff(&replayed, &reference)?
        );
    }

    let mut h = x;
    for (i, block) in model.blocks.iter().enumerate() {
        h = block.forward(&h)?;
        captures.insert(format!("block{}", i), h.clone())?;
    }

    let h = model.ln_f.forward(&h)?;
    captures.insert("ln_f", h.clone())?;
    let logits = model.lm_head.forward(&h)?;
    captures.insert("lm_head", logits.clone())?;
    let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
    captures.insert("probs", probs)?;

    let model_logits = model.forward(idx)?;
    let logits_match = tensors_equal(&logits, &model_logits)?;
    if !logits_match {
        error!(
            "ERROR: captured logits do not match model forward (max abs diff {:.3e})",
            max_abs_diff(&logits, &model_logits)?
        );
    }

    info!("Captured {} intermediates", captures.len());

    Ok(CaptureReport {
        captures,
        block_matches,
        logits_match,
    })
}
