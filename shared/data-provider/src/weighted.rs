use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{DataError, Result};
use crate::packed::{PackedReader, TokenBlock};

/// Weighted union of packed readers.
///
/// Each draw selects exactly one source with its normalized probability
/// (seeded, so deterministic) and yields that source's next block. The first
/// source to run dry ends the combined pass cleanly — survivors are not
/// re-drawn and no source is restarted mid-run. Equal-size sources with
/// equal weights exhaust together.
pub struct CombinedStream {
    sources: Vec<PackedReader>,
    weights: Vec<f64>,
    index: WeightedIndex<f64>,
    rng: ChaCha8Rng,
    exhausted_source: Option<usize>,
}

impl CombinedStream {
    pub fn new(sources: Vec<PackedReader>, weights: &[f64], seed: u64) -> Result<Self> {
        if sources.is_empty() {
            return Err(DataError::Config(
                "a combined stream needs at least one source".into(),
            ));
        }
        if sources.len() != weights.len() {
            return Err(DataError::Config(format!(
                "{} sources but {} weights",
                sources.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DataError::Config(
                "source weights must be finite and non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(DataError::Config(
                "source weights must sum to a positive value".into(),
            ));
        }
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| DataError::Config(format!("invalid source weights: {e}")))?;
        Ok(Self {
            sources,
            weights,
            index,
            rng: ChaCha8Rng::seed_from_u64(seed),
            exhausted_source: None,
        })
    }

    /// Weights after normalization; they sum to 1.
    pub fn normalized_weights(&self) -> &[f64] {
        &self.weights
    }

    /// The source whose exhaustion ended the pass, if it has ended.
    pub fn exhausted_source(&self) -> Option<usize> {
        self.exhausted_source
    }

    /// The exhaustion as an error value, for callers that must propagate the
    /// end of the pass rather than just stop iterating.
    pub fn exhaustion(&self) -> Option<DataError> {
        self.exhausted_source
            .map(|source_index| DataError::Exhausted { source_index })
    }
}

impl Iterator for CombinedStream {
    type Item = Result<TokenBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted_source.is_some() {
            return None;
        }
        let source_index = self.index.sample(&mut self.rng);
        match self.sources[source_index].next() {
            Some(block) => Some(block),
            None => {
                info!(source_index, "combined stream source exhausted, ending pass");
                self.exhausted_source = Some(source_index);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_weights() {
        assert!(matches!(
            CombinedStream::new(vec![], &[], 0),
            Err(DataError::Config(_))
        ));
    }
}
