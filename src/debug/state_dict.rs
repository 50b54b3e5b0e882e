//! Key accounting for GPT checkpoints
//!
//! A checkpoint exported from another tool may carry extra tensors (optimizer
//! state, tied heads) or may lack the `attn.bias` mask buffers, which are
//! rebuilt on load. This report splits the checkpoint's keys against the
//! state dict a given config expects.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::GptConfig;
use crate::models::gpt::{parameter_specs, WeightMap};

/// How a checkpoint's keys line up with a model's state dict
#[derive(Debug, Clone, PartialEq)]
pub struct StateDictReport {
    /// Checkpoint the keys came from
    pub source: PathBuf,
    /// Learned parameters present in the checkpoint
    pub loaded: usize,
    /// Learned parameters the model needs but the checkpoint lacks
    pub missing: Vec<String>,
    /// Mask buffers the checkpoint lacks; the model rebuilds these
    pub rebuilt_buffers: Vec<String>,
    /// Checkpoint keys the model never reads
    pub unused: Vec<String>,
}

impl StateDictReport {
    /// Compare checkpoint keys against the state dict for `config`
    ///
    /// `missing` and `rebuilt_buffers` keep state-dict order; `unused` is sorted.
    pub fn new(source: impl AsRef<Path>, config: &GptConfig, weights: &WeightMap) -> Self {
        let mut loaded = 0;
        let mut missing = Vec::new();
        let mut rebuilt_buffers = Vec::new();
        let mut known = HashSet::new();

        for spec in parameter_specs(config) {
            let present = weights.contains_key(&spec.name);
            match (present, spec.is_buffer()) {
                (true, false) => loaded += 1,
                (true, true) => {}
                (false, false) => missing.push(spec.name.clone()),
                (false, true) => rebuilt_buffers.push(spec.name.clone()),
            }
            known.insert(spec.name);
        }

        let mut unused: Vec<String> = weights
            .keys()
            .filter(|key| !known.contains(*key))
            .cloned()
            .collect();
        unused.sort();

        Self {
            source: source.as_ref().to_path_buf(),
            loaded,
            missing,
            rebuilt_buffers,
            unused,
        }
    }

    /// Every learned parameter was found
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Log the report; individual keys are listed at debug level or when missing
    pub fn log(&self) {
        info!(
            "{:?}: {} parameters loaded, {} missing, {} mask buffers rebuilt, {} unused",
            self.source,
            self.loaded,
            self.missing.len(),
            self.rebuilt_buffers.len(),
            self.unused.len()
        );
        for key in &self.missing {
            warn!("missing parameter {}", key);
        }
        for key in &self.rebuilt_buffers {
            debug!("rebuilding mask buffer {}", key);
        }
        for key in &self.unused {
            debug!("ignoring checkpoint tensor {}", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gpt::init_random;
    use candle_core::{Device, Tensor};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn nano_weights() -> WeightMap {
        let mut rng = StdRng::seed_from_u64(3407);
        init_random(&GptConfig::gpt_nano_sort(), &mut rng, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_full_checkpoint_is_complete() {
        let report = StateDictReport::new("model.safetensors", &GptConfig::gpt_nano_sort(), &nano_weights());
        assert!(report.is_complete());
        assert_eq!(report.loaded, 41);
        assert!(report.rebuilt_buffers.is_empty());
        assert!(report.unused.is_empty());
    }

    #[test]
    fn test_mask_buffers_are_not_unused_or_missing() {
        let mut weights = nano_weights();
        weights.remove("transformer.h.1.attn.bias");

        let report = StateDictReport::new("model.safetensors", &GptConfig::gpt_nano_sort(), &weights);
        assert!(report.is_complete());
        assert_eq!(report.rebuilt_buffers, vec!["transformer.h.1.attn.bias".to_string()]);
        assert!(report.unused.is_empty());
    }

    #[test]
    fn test_missing_and_unused_keys() {
        let mut weights = nano_weights();
        weights.remove("transformer.ln_f.bias");
        weights.remove("transformer.wpe.weight");
        weights.insert(
            "optimizer.step".to_string(),
            Tensor::new(&[1u32], &Device::Cpu).unwrap(),
        );

        let report = StateDictReport::new("ckpt.safetensors", &GptConfig::gpt_nano_sort(), &weights);
        assert!(!report.is_complete());
        assert_eq!(
            report.missing,
            vec!["transformer.wpe.weight".to_string(), "transformer.ln_f.bias".to_string()]
        );
        assert_eq!(report.unused, vec!["optimizer.step".to_string()]);
        assert_eq!(report.loaded, 39);
        assert_eq!(report.source, PathBuf::from("ckpt.safetensors"));
    }
}
