use candle_core::{IndexOp, Tensor};

use crate::error::LossError;
use crate::lattice::ctc::{
    ctc_forward_score, ctc_forward_score_batched, ctc_forward_score_reference,
};
use crate::lattice::transducer::{
    transducer_forward_score_batched, transducer_forward_score_reference,
};
use crate::lattice::validate;
use crate::loss::traits::{CtcScorer, TransducerScorer};
use crate::types::{CtcBatch, TransducerBatch};

type SequenceEngine = fn(&Tensor, &Tensor) -> Result<Tensor, LossError>;

/// Host nested loop, one sequence at a time. Not differentiable.
pub struct ReferenceCtcScorer;

impl CtcScorer for ReferenceCtcScorer {
    fn score_batch(&self, batch: &CtcBatch<'_>) -> Result<Tensor, LossError> {
        score_each_ctc(batch, ctc_forward_score_reference)
    }

    fn label(&self) -> &'static str {
        "reference"
    }
}

pub struct RowCtcScorer;

impl CtcScorer for RowCtcScorer {
    fn score_batch(&self, batch: &CtcBatch<'_>) -> Result<Tensor, LossError> {
        score_each_ctc(batch, ctc_forward_score)
    }

    fn label(&self) -> &'static str {
        "row_vectorized"
    }
}

pub struct BatchedCtcScorer;

impl CtcScorer for BatchedCtcScorer {
    fn score_batch(&self, batch: &CtcBatch<'_>) -> Result<Tensor, LossError> {
        ctc_forward_score_batched(
            batch.emissions,
            batch.targets,
            batch.emission_lengths,
            batch.target_lengths,
        )
    }

    fn label(&self) -> &'static str {
        "batched"
    }
}

/// Host nested loop over each sequence's own joint. Not differentiable.
pub struct ReferenceTransducerScorer;

impl TransducerScorer for ReferenceTransducerScorer {
    fn score_batch(&self, batch: &TransducerBatch<'_>) -> Result<Tensor, LossError> {
        let labels = validate::transducer_batch(
            batch.transcription,
            batch.prediction,
            batch.targets,
            batch.transcription_lengths,
            batch.target_lengths,
        )?;
        let device = batch.transcription.device();
        let scores = labels
            .into_iter()
            .enumerate()
            .map(|(n, labels)| {
                let frames = batch.transcription_lengths[n];
                let positions = labels.len() + 1;
                let f = batch
                    .transcription
                    .get(n)
                    .and_then(|t| t.narrow(0, 0, frames))
                    .map_err(|e| LossError::tensor("slice transcription", e))?;
                let g = batch
                    .prediction
                    .get(n)
                    .and_then(|t| t.narrow(0, 0, positions))
                    .map_err(|e| LossError::tensor("slice prediction", e))?;
                let targets = Tensor::new(labels.as_slice(), device)
                    .map_err(|e| LossError::tensor("sequence targets", e))?;
                transducer_forward_score_reference(&f, &g, &targets)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Tensor::stack(&scores, 0).map_err(|e| LossError::tensor("stack scores", e))
    }

    fn label(&self) -> &'static str {
        "reference"
    }
}

pub struct ScanTransducerScorer;

impl TransducerScorer for ScanTransducerScorer {
    fn score_batch(&self, batch: &TransducerBatch<'_>) -> Result<Tensor, LossError> {
        transducer_forward_score_batched(
            batch.transcription,
            batch.prediction,
            batch.targets,
            batch.transcription_lengths,
            batch.target_lengths,
        )
    }

    fn label(&self) -> &'static str {
        "scan"
    }
}

/// Slices every sequence out of the padded batch and scores it on its own.
fn score_each_ctc(batch: &CtcBatch<'_>, engine: SequenceEngine) -> Result<Tensor, LossError> {
    let labels = validate::ctc_batch(
        batch.emissions,
        batch.targets,
        batch.emission_lengths,
        batch.target_lengths,
    )?;
    let device = batch.emissions.device();
    let scores = labels
        .into_iter()
        .enumerate()
        .map(|(n, labels)| {
            let emissions = batch
                .emissions
                .narrow(0, 0, batch.emission_lengths[n])
                .and_then(|t| t.i((.., n)))
                .map_err(|e| LossError::tensor("slice emissions", e))?;
            let targets = Tensor::new(labels.as_slice(), device)
                .map_err(|e| LossError::tensor("sequence targets", e))?;
            engine(&emissions, &targets)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Tensor::stack(&scores, 0).map_err(|e| LossError::tensor("stack scores", e))
}
