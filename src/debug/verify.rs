//! Fixture verification
//!
//! Rebuilds the model from a model fixture, replays the capture on the
//! partials fixture's input batch and validates every golden tensor.

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use std::path::Path;
use tracing::{debug, info, warn};

use super::validator::{ValidationConfig, Validator};
use crate::capture::capture_all;
use crate::codec::TensorFixture;
use crate::config::GptConfig;
use crate::models::gpt::{Gpt, WeightMap};

/// Build a model from a decoded model fixture
pub fn model_from_fixture(fixture: &TensorFixture, device: &Device) -> Result<Gpt> {
    let config: GptConfig = serde_json::from_value(fixture.config.clone())
        .context("Model fixture has no usable config entry")?;
    let weights: WeightMap = fixture.tensors(device)?.into_iter().collect();
    Gpt::from_weights(config, &weights, device)
}

/// Replay the model fixture on the partials fixture's inputs
///
/// Returns the validator holding one result per golden tensor.
pub fn verify_fixtures<P: AsRef<Path>, Q: AsRef<Path>>(
    model_path: P,
    partials_path: Q,
    config: ValidationConfig,
) -> Result<Validator> {
    let device = Device::Cpu;

    let model_fixture = TensorFixture::load(model_path.as_ref())?;
    let model = model_from_fixture(&model_fixture, &device)?;
    info!(
        "Loaded {} model with {} parameters",
        model.config().model_type,
        model.num_parameters()
    );

    let partials = TensorFixture::load(partials_path.as_ref())?;
    let idx = partials
        .tensor("idx", &device)?
        .to_dtype(DType::U32)
        .context("Input batch is not convertible to token ids")?;

    if let Some(b) = partials.config.get("B").and_then(|b| b.as_u64()) {
        let rows = idx.dim(0)?;
        if rows as u64 != b {
            warn!("Partials config says B={} but idx has {} rows", b, rows);
        }
    }

    let report = capture_all(&model, &idx)?;
    if !report.is_consistent() {
        warn!("Replay is not self-consistent; results below may be misleading");
    }

    let golden_keys: Vec<String> = partials.keys().map(str::to_string).collect();
    let mut validator = Validator::with_config(partials, config);

    for name in &golden_keys {
        match report.captures.get(name) {
            Some(actual) => {
                validator.validate_tensor(name, actual)?;
            }
            None => validator.record_missing(name),
        }
    }

    for name in report.captures.keys() {
        if !golden_keys.iter().any(|k| k == name) {
            debug!("{} not present in golden fixture, skipped", name);
        }
    }

    Ok(validator)
}
