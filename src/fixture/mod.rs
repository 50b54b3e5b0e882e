//! Fixture generation
//!
//! Orchestrates one deterministic run:
//! 1. Seed the weight and input generators
//! 2. Load (or initialise) the model
//! 3. Build the input batch
//! 4. Capture intermediates and check them against the model
//! 5. Write the model and partials fixtures

mod driver;
mod inputs;

pub use crate::config::FixtureConfig;
pub use driver::{partials_config, FixtureDriver, FixtureSummary, WeightSource};
pub use inputs::build_input_batch;
