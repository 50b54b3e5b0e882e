//! Tolerance checks against a partials fixture
//!
//! Replayed intermediates are compared element-wise in f32 against the golden
//! records. Equal values (including matching infinities from the attention
//! mask) always pass; NaN on either side never does.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use std::fmt;
use tracing::warn;

use crate::codec::TensorFixture;

/// Tolerances for golden comparisons
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Absolute tolerance
    pub atol: f32,
    /// Relative tolerance, scaled by the golden value
    pub rtol: f32,
    /// Log individual out-of-tolerance elements
    pub verbose: bool,
    /// Cap on logged elements per tensor
    pub max_diffs: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            atol: 1e-4,
            rtol: 1e-3,
            verbose: false,
            max_diffs: 10,
        }
    }
}

impl ValidationConfig {
    fn accepts(&self, expected: f32, actual: f32) -> bool {
        expected == actual || (expected - actual).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// How one computed tensor compared with its golden record
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Every element within tolerance
    Within {
        /// Largest difference seen
        max_abs_diff: f32,
    },
    /// Some elements outside tolerance
    Diverged {
        /// Elements outside tolerance, NaN included
        out_of_tolerance: usize,
        /// Elements compared
        elements: usize,
        /// Largest finite difference seen
        max_abs_diff: f32,
    },
    /// Shapes disagree, values not compared
    ShapeMismatch {
        /// Golden shape
        expected: Vec<usize>,
        /// Replayed shape
        actual: Vec<usize>,
    },
    /// Nothing to compare on one side
    Missing(String),
}

/// Comparison outcome for a named tensor
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Fixture key
    pub name: String,
    /// What the comparison found
    pub outcome: Outcome,
}

impl ValidationResult {
    /// Whether the tensor matched within tolerance
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Within { .. })
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Within { max_abs_diff } => {
                write!(f, "[PASS] {} max_diff={:.2e}", self.name, max_abs_diff)
            }
            Outcome::Diverged {
                out_of_tolerance,
                elements,
                max_abs_diff,
            } => write!(
                f,
                "[FAIL] {} {}/{} elements out of tolerance, max_diff={:.2e}",
                self.name, out_of_tolerance, elements, max_abs_diff
            ),
            Outcome::ShapeMismatch { expected, actual } => write!(
                f,
                "[FAIL] {} shape {:?}, golden {:?}",
                self.name, actual, expected
            ),
            Outcome::Missing(reason) => write!(f, "[FAIL] {} {}", self.name, reason),
        }
    }
}

fn to_f32_vec(tensor: &Tensor) -> candle_core::Result<Vec<f32>> {
    tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()
}

/// Validates replayed tensors against a golden partials fixture
pub struct Validator {
    golden: TensorFixture,
    config: ValidationConfig,
    results: Vec<ValidationResult>,
}

impl Validator {
    /// Validator with default tolerances
    pub fn new(golden: TensorFixture) -> Self {
        Self::with_config(golden, ValidationConfig::default())
    }

    /// Validator with explicit tolerances
    pub fn with_config(golden: TensorFixture, config: ValidationConfig) -> Self {
        Self {
            golden,
            config,
            results: Vec::new(),
        }
    }

    fn record(&mut self, name: &str, outcome: Outcome) -> &ValidationResult {
        self.results.push(ValidationResult {
            name: name.to_string(),
            outcome,
        });
        &self.results[self.results.len() - 1]
    }

    /// Compare `actual` with the golden record called `name`
    pub fn validate_tensor(&mut self, name: &str, actual: &Tensor) -> Result<&ValidationResult> {
        if self.golden.get(name).is_none() {
            return Ok(self.record(name, Outcome::Missing("not in golden fixture".to_string())));
        }

        let golden = self.golden.tensor(name, &Device::Cpu)?;
        if golden.dims() != actual.dims() {
            let outcome = Outcome::ShapeMismatch {
                expected: golden.dims().to_vec(),
                actual: actual.dims().to_vec(),
            };
            return Ok(self.record(name, outcome));
        }

        let expected = to_f32_vec(&golden).with_context(|| format!("Unreadable golden {}", name))?;
        let actual = to_f32_vec(actual)?;

        let mut max_abs_diff = 0.0f32;
        let mut out_of_tolerance = 0;
        for (i, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
            if e == a {
                continue;
            }
            max_abs_diff = max_abs_diff.max((e - a).abs());
            if !self.config.accepts(e, a) {
                if self.config.verbose && out_of_tolerance < self.config.max_diffs {
                    warn!("{}[{}]: golden {:.6}, replayed {:.6}", name, i, e, a);
                }
                out_of_tolerance += 1;
            }
        }

        let outcome = if out_of_tolerance == 0 {
            Outcome::Within { max_abs_diff }
        } else {
            Outcome::Diverged {
                out_of_tolerance,
                elements: expected.len(),
                max_abs_diff,
            }
        };
        Ok(self.record(name, outcome))
    }

    /// Record a golden key the replay did not produce
    pub fn record_missing(&mut self, name: &str) {
        self.record(name, Outcome::Missing("not produced by replay".to_string()));
    }

    /// Results in validation order
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    /// Whether every recorded comparison passed
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(ValidationResult::passed)
    }

    /// Print one line per tensor and a total
    pub fn print_summary(&self) {
        for result in &self.results {
            println!("{}", result);
        }
        let passed = self.results.iter().filter(|r| r.passed()).count();
        println!("{}/{} tensors match", passed, self.results.len());
    }
}
