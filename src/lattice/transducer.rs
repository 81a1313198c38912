//! RNN-Transducer forward score.
//!
//! [Graves12] Sequence Transduction with Recurrent Neural Networks.
//!
//! The lattice is `T x U` with `U = labels + 1`. From cell `(t, u)` a blank
//! moves to `(t + 1, u)` and the label `y[u]` moves to `(t, u + 1)`. Values are
//! probabilities, not log-probabilities.
//!
//! Within one frame the recurrence along `u` is
//! `alpha[t, u] = alpha[t, u - 1] * label[t, u - 1] + alpha[t - 1, u] * blank[t - 1, u]`,
//! a first-order affine recurrence once the previous row is known, so each
//! row is produced by [`affine_scan`] instead of a loop over `u`.

use candle_core::{DType, IndexOp, Result, Tensor, D};

use super::gather_cells;
use super::scan::affine_scan;
use super::validate;
use crate::error::LossError;
use crate::types::BLANK_ID;

/// `softmax(f[t] + g[u])` over the class dimension.
///
/// `(T, K)` and `(U, K)` give `(T, U, K)`; `(N, T, K)` and `(N, U, K)` give
/// `(N, T, U, K)`.
pub fn joint_probs(
    transcription: &Tensor,
    prediction: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    validate::joint_operands(transcription, prediction)?;
    joint(transcription, prediction).map_err(|e| LossError::tensor("joint", e))
}

/// Negative probability of `targets`, computed cell by cell on the host.
///
/// Not connected to the autograd graph.
pub fn transducer_forward_score_reference(
    transcription: &Tensor,
    prediction: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::transducer_sequence(transcription, prediction, targets)?;
    let joint = joint(transcription, prediction).map_err(|e| LossError::tensor("joint", e))?;
    reference_score(&joint, &labels)
}

/// Host reference over a caller-supplied joint `(T, U, K)`.
pub fn transducer_reference_from_joint(
    joint: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::transducer_joint(joint, targets)?;
    reference_score(joint, &labels)
}

/// Negative probability of `targets` given transcription logits `(T, K)` and
/// prediction logits `(U, K)`. Differentiable with respect to both.
pub fn transducer_forward_score(
    transcription: &Tensor,
    prediction: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::transducer_sequence(transcription, prediction, targets)?;
    let frames = transcription.dims()[0];
    tracing::trace!(frames, positions = labels.len() + 1, "transducer scan forward");
    joint(transcription, prediction)
        .and_then(|joint| single_score(&joint, labels, frames))
        .map_err(|e| LossError::tensor("transducer forward", e))
}

/// Scan engine over a caller-supplied joint `(T, U, K)`.
pub fn transducer_forward_score_from_joint(
    joint: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::transducer_joint(joint, targets)?;
    let frames = joint.dims()[0];
    single_score(joint, labels, frames).map_err(|e| LossError::tensor("transducer forward", e))
}

/// Negative probabilities `(N,)` for a padded, batch-first batch.
///
/// `transcription` is `(N, T, K)`, `prediction` `(N, U, K)` and `targets`
/// `(N, U - 1)`. Rows are scanned over the padded extent and sequence `n` is
/// read at `(transcription_lengths[n] - 1, target_lengths[n])`.
pub fn transducer_forward_score_batched(
    transcription: &Tensor,
    prediction: &Tensor,
    targets: &Tensor,
    transcription_lengths: &[usize],
    target_lengths: &[usize],
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::transducer_batch(
        transcription,
        prediction,
        targets,
        transcription_lengths,
        target_lengths,
    )?;
    tracing::trace!(
        batch = labels.len(),
        frames = transcription.dims()[1],
        positions = prediction.dims()[1],
        "transducer batched scan forward"
    );
    joint(transcription, prediction)
        .and_then(|joint| scan_score(&joint, &labels, transcription_lengths))
        .map_err(|e| LossError::tensor("batched transducer forward", e))
}

fn joint(transcription: &Tensor, prediction: &Tensor) -> Result<Tensor> {
    let rank = transcription.rank();
    let logits = transcription
        .unsqueeze(rank - 1)?
        .broadcast_add(&prediction.unsqueeze(rank - 2)?)?;
    candle_nn::ops::softmax(&logits, D::Minus1)
}

fn single_score(joint: &Tensor, labels: Vec<u32>, frames: usize) -> Result<Tensor> {
    scan_score(&joint.unsqueeze(0)?, &[labels], &[frames])?.squeeze(0)
}

fn scan_score(joint: &Tensor, labels: &[Vec<u32>], frame_lengths: &[usize]) -> Result<Tensor> {
    let joint = joint.contiguous()?;
    let blank = blank_moves(&joint)?;
    let mult = label_moves(&joint, labels)?;
    let rows = scan_rows(&mult, &blank)?;
    let lattice = Tensor::stack(&rows, 1)?;

    let last_frames: Vec<usize> = frame_lengths.iter().map(|&len| len - 1).collect();
    let last_positions: Vec<usize> = labels.iter().map(Vec::len).collect();
    let alpha = gather_cells(&lattice, &last_frames, &last_positions)?;
    let exit = gather_cells(&blank, &last_frames, &last_positions)?;
    alpha.mul(&exit)?.neg()
}

/// `joint[n, t, u, blank]`, `(N, T, U)`.
fn blank_moves(joint: &Tensor) -> Result<Tensor> {
    joint.narrow(3, BLANK_ID as usize, 1)?.squeeze(3)
}

/// Probability of the label move that enters column `u`, `(N, T, U)`.
///
/// Column 0 is entered by no label and holds one; it is the `mult` slot whose
/// state is always zero.
fn label_moves(joint: &Tensor, labels: &[Vec<u32>]) -> Result<Tensor> {
    let (batch, frames, positions, _) = joint.dims4()?;
    let device = joint.device();
    let entering_first = Tensor::ones((batch, frames, 1), joint.dtype(), device)?;
    if positions == 1 {
        return Ok(entering_first);
    }

    // label leaving column u; the last column and the padding read blank
    let mut leaving = vec![BLANK_ID; batch * positions];
    for (n, row) in labels.iter().enumerate() {
        leaving[n * positions..n * positions + row.len()].copy_from_slice(row);
    }
    let index = Tensor::from_vec(leaving, (batch, 1, positions, 1), device)?
        .broadcast_as((batch, frames, positions, 1))?
        .contiguous()?;
    let leaving = joint.gather(&index, 3)?.squeeze(3)?;
    Tensor::cat(&[&entering_first, &leaving.narrow(2, 0, positions - 1)?], 2)
}

/// One `(N, U)` row of alphas per frame.
fn scan_rows(mult: &Tensor, blank: &Tensor) -> Result<Vec<Tensor>> {
    let (batch, frames, positions) = mult.dims3()?;
    let (dtype, device) = (mult.dtype(), mult.device());
    let init = Tensor::zeros(batch, dtype, device)?;

    // alpha[0, 0] = 1 is injected through the add term of column 0
    let mut start = vec![0f64; batch * positions];
    for n in 0..batch {
        start[n * positions] = 1.0;
    }
    let mut add = Tensor::from_vec(start, (batch, positions), device)?.to_dtype(dtype)?;

    let mut rows = Vec::with_capacity(frames);
    for t in 0..frames {
        let row = affine_scan(&mult.i((.., t))?, &add, &init)?.narrow(D::Minus1, 1, positions)?;
        if t + 1 < frames {
            add = row.mul(&blank.i((.., t))?)?;
        }
        rows.push(row);
    }
    Ok(rows)
}

fn reference_score(joint: &Tensor, labels: &[u32]) -> std::result::Result<Tensor, LossError> {
    let probs = joint
        .to_dtype(DType::F64)
        .and_then(|t| t.to_vec3::<f64>())
        .map_err(|e| LossError::tensor("read joint", e))?;
    let alpha = reference_alpha(&probs, labels);
    let (last_t, last_u) = (probs.len() - 1, labels.len());
    let score = -(alpha[last_t][last_u] * probs[last_t][last_u][BLANK_ID as usize]);
    Tensor::new(score, joint.device())
        .and_then(|t| t.to_dtype(joint.dtype()))
        .map_err(|e| LossError::tensor("transducer reference readout", e))
}

fn reference_alpha(joint: &[Vec<Vec<f64>>], labels: &[u32]) -> Vec<Vec<f64>> {
    let frames = joint.len();
    let positions = labels.len() + 1;
    let blank = BLANK_ID as usize;
    let mut alpha = vec![vec![0.0; positions]; frames];
    for t in 0..frames {
        for u in 0..positions {
            alpha[t][u] = match (t, u) {
                (0, 0) => 1.0,
                (0, u) => alpha[0][u - 1] * joint[0][u - 1][labels[u - 1] as usize],
                (t, 0) => alpha[t - 1][0] * joint[t - 1][0][blank],
                (t, u) => {
                    alpha[t - 1][u] * joint[t - 1][u][blank]
                        + alpha[t][u - 1] * joint[t][u - 1][labels[u - 1] as usize]
                }
            };
        }
    }
    alpha
}
