//! # gpt-fixtures
//!
//! Golden-data generator for a small GPT ("gpt-nano") trained on a sorting
//! task. The model is run forward on a fixed input batch, every intermediate
//! tensor of the first transformer block (plus each stage output) is captured,
//! and both the weights and the captures are written to JSON for an external
//! test suite.
//!
//! ## Features
//!
//! - GPT decoder built on Candle tensors (CPU, f32)
//! - Stage-by-stage replay with exact self-consistency checks
//! - `{shape, dtype, data}` JSON tensor codec with base64 payloads
//! - Fixture verification against a previously written run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gpt_fixtures::{FixtureConfig, FixtureDriver};
//!
//! let summary = FixtureDriver::new(FixtureConfig::default()).run()?;
//! println!("wrote {:?}", summary.partials_path);
//! ```

// Require docs for public items
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod capture;
pub mod codec;
pub mod config;
pub mod debug;
pub mod fixture;
pub mod models;
pub mod utils;

// Re-exports for convenience
pub use capture::{capture_all, CaptureReport, Captures};
pub use codec::{TensorFixture, TensorJson};
pub use config::{FixtureConfig, GptConfig, ModelType};
pub use debug::{StateDictReport, Validator};
pub use fixture::{FixtureDriver, FixtureSummary, WeightSource};
pub use models::Gpt;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
