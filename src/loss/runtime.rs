use candle_core::{DType, Tensor};

use crate::config::LossConfig;
use crate::error::LossError;
use crate::loss::traits::{CtcScorer, TransducerScorer};
use crate::types::{CtcBatch, Reduction, TransducerBatch};

pub struct CtcLoss {
    config: LossConfig,
    scorer: Box<dyn CtcScorer>,
}

impl CtcLoss {
    pub(crate) fn from_parts(config: LossConfig, scorer: Box<dyn CtcScorer>) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Scores the batch and folds the per-sequence losses by the configured
    /// reduction. `Reduction::None` returns shape `(N,)`, anything else a
    /// scalar.
    pub fn forward(&self, batch: &CtcBatch<'_>) -> Result<Tensor, LossError> {
        tracing::debug!(
            batch = batch.emission_lengths.len(),
            frames = batch.emissions.dims().first().copied().unwrap_or(0),
            labels = batch.target_lengths.iter().sum::<usize>(),
            scorer = self.scorer.label(),
            "ctc loss forward"
        );
        let losses = self.scorer.score_batch(batch)?;
        let losses = if self.config.zero_infinity {
            zero_infinite(losses)?
        } else {
            losses
        };
        reduce(&losses, self.config.reduction, batch.target_lengths)
    }
}

pub struct TransducerLoss {
    config: LossConfig,
    scorer: Box<dyn TransducerScorer>,
}

impl TransducerLoss {
    pub(crate) fn from_parts(config: LossConfig, scorer: Box<dyn TransducerScorer>) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    pub fn forward(&self, batch: &TransducerBatch<'_>) -> Result<Tensor, LossError> {
        tracing::debug!(
            batch = batch.transcription_lengths.len(),
            frames = batch.transcription.dims().get(1).copied().unwrap_or(0),
            labels = batch.target_lengths.iter().sum::<usize>(),
            scorer = self.scorer.label(),
            "transducer loss forward"
        );
        let losses = self.scorer.score_batch(batch)?;
        reduce(&losses, self.config.reduction, batch.target_lengths)
    }
}

/// Losses of `+inf` (no valid alignment) become zero and stop carrying
/// gradient.
fn zero_infinite(losses: Tensor) -> Result<Tensor, LossError> {
    let host = losses
        .to_dtype(DType::F64)
        .and_then(|t| t.to_vec1::<f64>())
        .map_err(|e| LossError::tensor("read losses", e))?;
    let infinite: Vec<u8> = host.iter().map(|&v| u8::from(v == f64::INFINITY)).collect();
    let replaced = infinite.iter().filter(|&&m| m == 1).count();
    if replaced == 0 {
        return Ok(losses);
    }
    tracing::warn!(
        replaced,
        batch = host.len(),
        "replacing infinite ctc losses with zero"
    );
    Tensor::from_vec(infinite, host.len(), losses.device())
        .and_then(|mask| mask.where_cond(&losses.zeros_like()?, &losses))
        .map_err(|e| LossError::tensor("zero infinite losses", e))
}

fn reduce(
    losses: &Tensor,
    reduction: Reduction,
    target_lengths: &[usize],
) -> Result<Tensor, LossError> {
    let reduced = match reduction {
        Reduction::None => Ok(losses.clone()),
        Reduction::Sum => losses.sum_all(),
        Reduction::Mean => losses.mean_all(),
        Reduction::TokenMean => {
            let tokens = target_lengths.iter().sum::<usize>().max(1);
            losses
                .sum_all()
                .and_then(|sum| sum.affine(1.0 / tokens as f64, 0.0))
        }
    };
    reduced.map_err(|e| LossError::tensor("reduce losses", e))
}
