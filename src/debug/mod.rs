//! Debug and validation utilities
//!
//! Tools for checking fixtures and weights:
//! - Tolerance comparison against a partials fixture
//! - Replaying a model fixture and validating every captured intermediate
//! - Checkpoint key accounting

mod state_dict;
mod validator;
mod verify;

pub use state_dict::StateDictReport;
pub use validator::{Outcome, ValidationConfig, ValidationResult, Validator};
pub use verify::{model_from_fixture, verify_fixtures};
