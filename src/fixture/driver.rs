//! End-to-end fixture generation

use anyhow::{Context, Result};
use candle_core::Device;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};

use super::inputs::build_input_batch;
use crate::capture::capture_all;
use crate::codec::TensorFixture;
use crate::config::{FixtureConfig, GptConfig};
use crate::debug::StateDictReport;
use crate::models::gpt::{init_random, load_weights, Gpt, WeightMap};

/// Where the model weights come from
#[derive(Debug, Clone, PartialEq)]
pub enum WeightSource {
    /// A `.safetensors` checkpoint or a model fixture `.json`
    Pretrained(PathBuf),
    /// Seeded initialisation from `FixtureConfig::seed`
    RandomInit,
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct FixtureSummary {
    /// Where the parameter fixture was written
    pub model_path: PathBuf,
    /// Where the intermediates fixture was written
    pub partials_path: PathBuf,
    /// Learned parameters, excluding `lm_head` and mask buffers
    pub num_parameters: usize,
    /// Tensors in the partials fixture
    pub num_captures: usize,
    /// Replayed block 0 equals `Block::forward`
    pub block_matches: bool,
    /// Captured logits equal `Gpt::forward`
    pub logits_match: bool,
}

/// `config` entry of the partials fixture: the model config plus `B`
pub fn partials_config(model: &GptConfig, batch_size: usize) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(model)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Model config did not serialize to an object"))?;
    object.insert("B".to_string(), batch_size.into());
    Ok(value)
}

/// Runs one deterministic generation
pub struct FixtureDriver {
    config: FixtureConfig,
    source: WeightSource,
    device: Device,
}

impl FixtureDriver {
    /// Driver that loads weights from `config.weights`
    pub fn new(config: FixtureConfig) -> Self {
        let source = WeightSource::Pretrained(config.weights.clone());
        Self {
            config,
            source,
            device: Device::Cpu,
        }
    }

    /// Replace the weight source
    pub fn with_source(mut self, source: WeightSource) -> Self {
        self.source = source;
        self
    }

    /// Run settings
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    fn load_weights(&self, rng: &mut StdRng) -> Result<WeightMap> {
        match &self.source {
            WeightSource::Pretrained(path) => {
                let weights = load_weights(path, &self.device)?;
                StateDictReport::new(path, &self.config.model, &weights).log();
                Ok(weights)
            }
            WeightSource::RandomInit => {
                info!("Initialising weights from seed {}", self.config.seed);
                init_random(&self.config.model, rng, &self.device)
            }
        }
    }

    /// Build the model from the configured weight source
    pub fn load_model(&self) -> Result<Gpt> {
        self.config.validate()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let weights = self.load_weights(&mut rng)?;
        let model = Gpt::from_weights(self.config.model.clone(), &weights, &self.device)
            .context("Failed to build GPT from weights")?;
        info!(
            "number of parameters: {:.2}M",
            model.num_parameters() as f64 / 1e6
        );
        Ok(model)
    }

    /// Generate both fixture files
    pub fn run(&self) -> Result<FixtureSummary> {
        let model = self.load_model()?;
        self.run_model(&model)
    }

    /// Generate both fixture files from an already loaded model
    pub fn run_model(&self, model: &Gpt) -> Result<FixtureSummary> {
        let config = &self.config;
        if model.config() != &config.model {
            anyhow::bail!(
                "Model config {:?} does not match fixture config {:?}",
                model.config(),
                config.model
            );
        }

        let mut input_rng = StdRng::seed_from_u64(config.input_seed);
        let idx = build_input_batch(config, &mut input_rng, &self.device)?;
        println!("{}", idx);

        let report = capture_all(model, &idx)?;
        if !report.is_consistent() {
            warn!("Fixture written from an inconsistent replay; do not trust it");
        }

        let params = model.named_parameters();
        let model_fixture = TensorFixture::from_tensors(
            serde_json::to_value(&config.model)?,
            params.iter().map(|(name, tensor)| (name.as_str(), tensor)),
        )?;
        model_fixture.save(&config.model_out)?;
        info!("Wrote {} parameters to {:?}", model_fixture.len(), config.model_out);

        println!("{}", serde_json::to_string(&config.model)?);

        let partials_fixture = TensorFixture::from_tensors(
            partials_config(&config.model, config.batch_size)?,
            report.captures.iter(),
        )?;
        partials_fixture.save(&config.partials_out)?;
        info!(
            "Wrote {} intermediates to {:?}",
            partials_fixture.len(),
            config.partials_out
        );

        let shapes: Vec<String> = report
            .captures
            .shape_summary()
            .into_iter()
            .map(|(name, shape)| format!("{}: {:?}", name, shape))
            .collect();
        println!("{{{}}}", shapes.join(", "));

        Ok(FixtureSummary {
            model_path: config.model_out.clone(),
            partials_path: config.partials_out.clone(),
            num_parameters: model.num_parameters(),
            num_captures: report.captures.len(),
            block_matches: report.block_matches,
            logits_match: report.logits_match,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_config_adds_batch_size() {
        let value = partials_config(&GptConfig::gpt_nano_sort(), 3).unwrap();
        assert_eq!(value["B"], 3);
        assert_eq!(value["model_type"], "gpt-nano");
        assert_eq!(value["block_size"], 11);

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.last().unwrap().as_str(), "B");
    }

    #[test]
    fn test_missing_weights_are_fatal() {
        let mut config = FixtureConfig::default();
        config.weights = PathBuf::from("no/such/model.safetensors");
        assert!(FixtureDriver::new(config).load_model().is_err());
    }

    #[test]
    fn test_random_init_model() {
        let driver = FixtureDriver::new(FixtureConfig::default()).with_source(WeightSource::RandomInit);
        let model = driver.load_model().unwrap();
        assert_eq!(model.blocks.len(), 3);
        assert_eq!(model.config().vocab_size, 3);
    }

    #[test]
    fn test_run_model_matches_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FixtureConfig::default();
        config.model_out = dir.path().join("a").join("model.json");
        config.partials_out = dir.path().join("a").join("partials.json");
        let first = FixtureDriver::new(config.clone())
            .with_source(WeightSource::RandomInit)
            .run()
            .unwrap();

        config.model_out = dir.path().join("b").join("model.json");
        config.partials_out = dir.path().join("b").join("partials.json");
        let driver = FixtureDriver::new(config).with_source(WeightSource::RandomInit);
        let model = driver.load_model().unwrap();
        let second = driver.run_model(&model).unwrap();

        assert_eq!(
            std::fs::read(&first.partials_path).unwrap(),
            std::fs::read(&second.partials_path).unwrap()
        );
    }

    #[test]
    fn test_run_model_rejects_other_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FixtureConfig::default();
        config.model_out = dir.path().join("model.json");
        config.partials_out = dir.path().join("partials.json");

        let mut other = config.clone();
        other.model = GptConfig::custom(2, 2, 8, 3, 11);
        let model = FixtureDriver::new(other)
            .with_source(WeightSource::RandomInit)
            .load_model()
            .unwrap();

        let driver = FixtureDriver::new(config.clone()).with_source(WeightSource::RandomInit);
        assert!(driver.run_model(&model).is_err());
        assert!(!config.model_out.exists());
    }

    #[test]
    fn test_run_writes_both_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FixtureConfig::default();
        config.model_out = dir.path().join("model.json");
        config.partials_out = dir.path().join("partials.json");

        let summary = FixtureDriver::new(config)
            .with_source(WeightSource::RandomInit)
            .run()
            .unwrap();

        assert!(summary.block_matches && summary.logits_match);
        assert!(summary.model_path.exists());
        assert!(summary.partials_path.exists());

        let partials = TensorFixture::load(&summary.partials_path).unwrap();
        assert_eq!(partials.len(), summary.num_captures);
        assert_eq!(partials.config["B"], 3);

        let model = TensorFixture::load(&summary.model_path).unwrap();
        assert_eq!(model.keys().next(), Some("transformer.wte.weight"));
        assert_eq!(model.len(), 44);
    }
}
