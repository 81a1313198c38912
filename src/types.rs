use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// Class index reserved for the blank symbol in every alphabet.
pub const BLANK_ID: u32 = 0;

/// How per-sequence losses are folded into the value returned by a loss object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// One loss per sequence, shape `(N,)`.
    None,
    Sum,
    /// Mean over the batch.
    #[default]
    Mean,
    /// Sum divided by the total number of target labels in the batch.
    TokenMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtcStrategy {
    /// Scalar nested loop on host values. Not differentiable.
    Reference,
    /// Row-vectorized engine, one sequence at a time.
    RowVectorized,
    /// Whole batch in one padded lattice.
    #[default]
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransducerStrategy {
    /// Scalar nested loop on host values. Not differentiable.
    Reference,
    /// Rows solved with the affine scan, whole batch at once.
    #[default]
    Scan,
}

/// A padded, time-major CTC batch.
#[derive(Debug, Clone, Copy)]
pub struct CtcBatch<'a> {
    /// Log-probabilities, `(T, N, C)`.
    pub emissions: &'a Tensor,
    /// Label indices, `(N, S)`, padded past each target length.
    pub targets: &'a Tensor,
    pub emission_lengths: &'a [usize],
    pub target_lengths: &'a [usize],
}

/// A padded, batch-first transducer batch.
#[derive(Debug, Clone, Copy)]
pub struct TransducerBatch<'a> {
    /// Transcription-network logits, `(N, T, K)`.
    pub transcription: &'a Tensor,
    /// Prediction-network logits, `(N, U, K)`; position 0 is the blank context.
    pub prediction: &'a Tensor,
    /// Label indices, `(N, U - 1)`, padded past each target length.
    pub targets: &'a Tensor,
    pub transcription_lengths: &'a [usize],
    pub target_lengths: &'a [usize],
}
