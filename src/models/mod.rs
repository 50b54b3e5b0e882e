//! Neural network models
//!
//! This module contains the GPT decoder the fixtures are generated from.

pub mod gpt;

// Re-exports
pub use gpt::Gpt;
