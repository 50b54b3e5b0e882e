//! Capture harness
//!
//! Replays the GPT forward pass stage by stage and records every named
//! intermediate tensor in production order:
//! - Embedding stage (`idx`, `tok_emb`, `pos_emb`, `x`)
//! - First block internals (attention and MLP partials, residuals)
//! - Per-block outputs, final norm, logits and probabilities

mod captures;
mod harness;

pub use captures::Captures;
pub use harness::{
    attention_forward_with_capture, block_forward_with_capture, capture_all,
    gpt_forward_with_capture, mlp_forward_with_capture, CaptureReport,
};
