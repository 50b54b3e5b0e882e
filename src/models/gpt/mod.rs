//! GPT decoder model
//!
//! - `Gpt`: embeddings, transformer blocks, final norm, LM head
//! - Weight sources: safetensors, model fixtures, seeded init

mod model;
mod weights;

pub use model::{Block, CausalSelfAttention, Gpt, Mlp, Norm};
pub use weights::{init_random, load_weights, parameter_specs, ParamInit, ParamSpec, WeightMap};
