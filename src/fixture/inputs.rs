//! Deterministic input batches

use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::FixtureConfig;

/// Build the (batch, block_size) token batch
///
/// Row 0 is the literal row. Every other row holds `random_prefix_len`
/// tokens drawn from `rng` followed by zero padding. With three or more
/// rows, the first token of row 2 is forced to 1 so that no generated row
/// can be all zeros by chance on both sides.
pub fn build_input_batch(config: &FixtureConfig, rng: &mut StdRng, device: &Device) -> Result<Tensor> {
    let block_size = config.model.block_size;
    let vocab_size = config.model.vocab_size as u32;

    if config.literal_row.len() != block_size {
        anyhow::bail!(
            "Literal input row has length {}, block size is {}",
            config.literal_row.len(),
            block_size
        );
    }
    if let Some(&token) = config.literal_row.iter().find(|&&t| t >= vocab_size) {
        anyhow::bail!("Literal input token {} outside vocabulary of {}", token, vocab_size);
    }
    if config.random_prefix_len > block_size {
        anyhow::bail!(
            "random_prefix_len ({}) exceeds block size ({})",
            config.random_prefix_len,
            block_size
        );
    }

    let mut rows: Vec<Vec<u32>> = Vec::with_capacity(config.batch_size);
    rows.push(config.literal_row.clone());

    for _ in 1..config.batch_size {
        let mut row = vec![0u32; block_size];
        for token in row.iter_mut().take(config.random_prefix_len) {
            *token = rng.gen_range(0..vocab_size);
        }
        rows.push(row);
    }

    if rows.len() > 2 && vocab_size > 1 {
        rows[2][0] = 1;
    }

    let flat: Vec<u32> = rows.into_iter().flatten().collect();
    Tensor::from_vec(flat, (config.batch_size, block_size), device).map_err(Into::into)
}
