use candle_core::Tensor;

use crate::error::LossError;
use crate::types::{CtcBatch, TransducerBatch};

pub trait CtcScorer: Send + Sync {
    /// Per-sequence negative log-probabilities, `(N,)`.
    fn score_batch(&self, batch: &CtcBatch<'_>) -> Result<Tensor, LossError>;

    fn label(&self) -> &'static str;
}

pub trait TransducerScorer: Send + Sync {
    /// Per-sequence negative probabilities, `(N,)`.
    fn score_batch(&self, batch: &TransducerBatch<'_>) -> Result<Tensor, LossError>;

    fn label(&self) -> &'static str;
}
