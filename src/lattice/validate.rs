//! Boundary checks shared by the engine entry points.
//!
//! Every public engine calls into this module once, before allocating its
//! lattice; the recurrences themselves assume validated input.

use candle_core::{DType, Tensor};

use crate::error::LossError;
use crate::types::BLANK_ID;

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), LossError> {
    if condition {
        Ok(())
    } else {
        Err(LossError::invalid_input(message()))
    }
}

pub(crate) fn float_dims<const N: usize>(
    tensor: &Tensor,
    name: &str,
    layout: &str,
) -> Result<[usize; N], LossError> {
    ensure(tensor.dtype().is_float(), || {
        format!("{name} must be a float tensor, got {:?}", tensor.dtype())
    })?;
    let dims: [usize; N] = tensor.dims().try_into().map_err(|_| {
        LossError::invalid_input(format!(
            "{name} must have shape {layout}, got {:?}",
            tensor.dims()
        ))
    })?;
    Ok(dims)
}

fn host_labels(targets: &Tensor) -> Result<Vec<i64>, LossError> {
    ensure(targets.rank() == 1, || {
        format!("targets must be rank 1, got shape {:?}", targets.dims())
    })?;
    ensure(!targets.dtype().is_float(), || {
        format!("targets must be an integer tensor, got {:?}", targets.dtype())
    })?;
    targets
        .to_dtype(DType::I64)
        .and_then(|t| t.to_vec1::<i64>())
        .map_err(|e| LossError::tensor("read targets", e))
}

fn host_label_rows(targets: &Tensor, batch: usize) -> Result<Vec<Vec<i64>>, LossError> {
    ensure(targets.rank() == 2 && targets.dims()[0] == batch, || {
        format!(
            "targets must have shape (N={batch}, S), got {:?}",
            targets.dims()
        )
    })?;
    ensure(!targets.dtype().is_float(), || {
        format!("targets must be an integer tensor, got {:?}", targets.dtype())
    })?;
    if targets.dims()[1] == 0 {
        return Ok(vec![Vec::new(); batch]);
    }
    targets
        .to_dtype(DType::I64)
        .and_then(|t| t.to_vec2::<i64>())
        .map_err(|e| LossError::tensor("read targets", e))
}

/// Labels must lie in `[1, classes)`; blank is never a target.
fn checked_labels(
    labels: &[i64],
    classes: usize,
    sequence: Option<usize>,
) -> Result<Vec<u32>, LossError> {
    labels
        .iter()
        .enumerate()
        .map(|(i, &label)| {
            if label > BLANK_ID as i64 && (label as u64) < classes as u64 {
                Ok(label as u32)
            } else {
                let at = match sequence {
                    Some(n) => format!("sequence {n}, position {i}"),
                    None => format!("position {i}"),
                };
                Err(LossError::invalid_input(format!(
                    "target label {label} at {at} is outside [1, {classes})"
                )))
            }
        })
        .collect()
}

fn check_lengths(lengths: &[usize], batch: usize, name: &str) -> Result<(), LossError> {
    ensure(lengths.len() == batch, || {
        format!("{name} has {} entries for a batch of {batch}", lengths.len())
    })
}

/// Single-sequence CTC: emissions `(T, C)`, targets `(S,)` with `S < T`.
pub(crate) fn ctc_sequence(emissions: &Tensor, targets: &Tensor) -> Result<Vec<u32>, LossError> {
    let [frames, classes] = float_dims::<2>(emissions, "emissions", "(T, C)")?;
    ensure(frames > 0, || "emissions have no frames".to_string())?;
    ensure(classes > 0, || "emissions have no classes".to_string())?;
    let labels = host_labels(targets)?;
    ensure(labels.len() < frames, || {
        format!(
            "target length {} must be shorter than emission length {frames}",
            labels.len()
        )
    })?;
    checked_labels(&labels, classes, None)
}

/// Batched CTC: emissions `(T, N, C)`, targets `(N, S)`, per-sequence lengths.
///
/// Returns each sequence's labels truncated to its target length.
pub(crate) fn ctc_batch(
    emissions: &Tensor,
    targets: &Tensor,
    emission_lengths: &[usize],
    target_lengths: &[usize],
) -> Result<Vec<Vec<u32>>, LossError> {
    let [frames, batch, classes] = float_dims::<3>(emissions, "emissions", "(T, N, C)")?;
    ensure(frames > 0, || "emissions have no frames".to_string())?;
    ensure(batch > 0, || "batch is empty".to_string())?;
    ensure(classes > 0, || "emissions have no classes".to_string())?;
    check_lengths(emission_lengths, batch, "emission_lengths")?;
    check_lengths(target_lengths, batch, "target_lengths")?;
    let rows = host_label_rows(targets, batch)?;
    let padded = targets.dims()[1];

    rows.iter()
        .enumerate()
        .map(|(n, row)| {
            let (emitted, labelled) = (emission_lengths[n], target_lengths[n]);
            ensure(emitted > 0 && emitted <= frames, || {
                format!("emission length {emitted} of sequence {n} is outside [1, {frames}]")
            })?;
            ensure(labelled <= padded, || {
                format!("target length {labelled} of sequence {n} exceeds padded width {padded}")
            })?;
            ensure(labelled < emitted, || {
                format!(
                    "target length {labelled} of sequence {n} must be shorter than \
                     its emission length {emitted}"
                )
            })?;
            checked_labels(&row[..labelled], classes, Some(n))
        })
        .collect()
}

/// Single-sequence transducer: transcription `(T, K)`, prediction `(U, K)`,
/// targets `(U - 1,)`.
pub(crate) fn transducer_sequence(
    transcription: &Tensor,
    prediction: &Tensor,
    targets: &Tensor,
) -> Result<Vec<u32>, LossError> {
    let [frames, classes] = float_dims::<2>(transcription, "transcription", "(T, K)")?;
    let [positions, prediction_classes] = float_dims::<2>(prediction, "prediction", "(U, K)")?;
    check_transducer_extents(frames, classes, positions, prediction_classes)?;
    let labels = host_labels(targets)?;
    ensure(labels.len() + 1 == positions, || {
        format!(
            "prediction has {positions} positions but targets hold {} labels (expected U - 1)",
            labels.len()
        )
    })?;
    checked_labels(&labels, classes, None)
}

/// Operands of the joint: `(T, K)` and `(U, K)`, or `(N, T, K)` and `(N, U, K)`.
pub(crate) fn joint_operands(transcription: &Tensor, prediction: &Tensor) -> Result<(), LossError> {
    let (f, g) = (transcription.dims(), prediction.dims());
    ensure(transcription.dtype().is_float() && prediction.dtype().is_float(), || {
        "joint operands must be float tensors".to_string()
    })?;
    ensure(matches!(f.len(), 2 | 3) && f.len() == g.len(), || {
        format!(
            "joint operands must be (T, K) and (U, K) or batched with a leading N, \
             got {f:?} and {g:?}"
        )
    })?;
    if f.len() == 3 {
        ensure(f[0] == g[0], || {
            format!("prediction batch {} differs from transcription batch {}", g[0], f[0])
        })?;
    }
    let (classes, prediction_classes) = (f[f.len() - 1], g[g.len() - 1]);
    ensure(classes == prediction_classes, || {
        format!("transcription has {classes} classes but prediction has {prediction_classes}")
    })
}

/// Checks a precomputed joint `(T, U, K)` against its targets `(U - 1,)`.
pub(crate) fn transducer_joint(joint: &Tensor, targets: &Tensor) -> Result<Vec<u32>, LossError> {
    let [frames, positions, classes] = float_dims::<3>(joint, "joint", "(T, U, K)")?;
    check_transducer_extents(frames, classes, positions, classes)?;
    let labels = host_labels(targets)?;
    ensure(labels.len() + 1 == positions, || {
        format!(
            "joint has {positions} positions but targets hold {} labels (expected U - 1)",
            labels.len()
        )
    })?;
    checked_labels(&labels, classes, None)
}

/// Batched transducer: transcription `(N, T, K)`, prediction `(N, U, K)`,
/// targets `(N, U - 1)`.
pub(crate) fn transducer_batch(
    transcription: &Tensor,
    prediction: &Tensor,
    targets: &Tensor,
    transcription_lengths: &[usize],
    target_lengths: &[usize],
) -> Result<Vec<Vec<u32>>, LossError> {
    let [batch, frames, classes] =
        float_dims::<3>(transcription, "transcription", "(N, T, K)")?;
    let [prediction_batch, positions, prediction_classes] =
        float_dims::<3>(prediction, "prediction", "(N, U, K)")?;
    ensure(batch > 0, || "batch is empty".to_string())?;
    ensure(prediction_batch == batch, || {
        format!("prediction batch {prediction_batch} differs from transcription batch {batch}")
    })?;
    check_transducer_extents(frames, classes, positions, prediction_classes)?;
    check_lengths(transcription_lengths, batch, "transcription_lengths")?;
    check_lengths(target_lengths, batch, "target_lengths")?;
    let rows = host_label_rows(targets, batch)?;
    let padded = targets.dims()[1];
    ensure(padded + 1 == positions, || {
        format!(
            "prediction has {positions} positions but targets are padded to {padded} \
             (expected U - 1)"
        )
    })?;

    rows.iter()
        .enumerate()
        .map(|(n, row)| {
            let (emitted, labelled) = (transcription_lengths[n], target_lengths[n]);
            ensure(emitted > 0 && emitted <= frames, || {
                format!("transcription length {emitted} of sequence {n} is outside [1, {frames}]")
            })?;
            ensure(labelled <= padded, || {
                format!("target length {labelled} of sequence {n} exceeds padded width {padded}")
            })?;
            checked_labels(&row[..labelled], classes, Some(n))
        })
        .collect()
}

fn check_transducer_extents(
    frames: usize,
    classes: usize,
    positions: usize,
    prediction_classes: usize,
) -> Result<(), LossError> {
    ensure(frames > 0, || "transcription has no frames".to_string())?;
    ensure(positions > 0, || {
        "prediction needs at least the leading blank position".to_string()
    })?;
    ensure(classes > 0, || "alphabet is empty".to_string())?;
    ensure(classes == prediction_classes, || {
        format!("transcription has {classes} classes but prediction has {prediction_classes}")
    })
}
