//! CTC forward score.
//!
//! [Graves06] Connectionist Temporal Classification: Labelling Unsegmented
//! Sequence Data with Recurrent Neural Networks.
//!
//! The lattice has one column per expanded-target symbol (`_ A _ B _`) and one
//! row per frame. A cell is entered from the same column (self loop), from the
//! column to its left, or by skipping the blank two columns back when the
//! column's [`ColumnRule`] allows it. All arithmetic is in log space.

use candle_core::{DType, Device, Result, Shape, Tensor, D};

use super::expand::{ColumnRule, ExpandedBatch, ExpandedTargets};
use super::gather_cells;
use super::logspace::{log_add_exp, log_add_exp_f64, neg_inf};
use super::validate;
use crate::error::LossError;

/// Scalar nested-loop lattice on host values, `[T][2S + 1]`.
pub fn ctc_reference_log_alpha(
    emissions: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Vec<Vec<f64>>, LossError> {
    let labels = validate::ctc_sequence(emissions, targets)?;
    let expanded = ExpandedTargets::new(&labels);
    let log_probs = emissions
        .to_dtype(DType::F64)
        .and_then(|t| t.to_vec2::<f64>())
        .map_err(|e| LossError::tensor("read emissions", e))?;
    Ok(reference_log_alpha(&log_probs, &expanded))
}

/// Negative log-probability of `targets`, computed cell by cell on the host.
///
/// This is the correctness oracle for the tensor engines. The result is a
/// rank-0 tensor on the emissions' device and dtype but it is not connected
/// to the autograd graph.
pub fn ctc_forward_score_reference(
    emissions: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let lattice = ctc_reference_log_alpha(emissions, targets)?;
    let score = -reference_readout(&lattice);
    Tensor::new(score, emissions.device())
        .and_then(|t| t.to_dtype(emissions.dtype()))
        .map_err(|e| LossError::tensor("ctc reference readout", e))
}

/// Row-vectorized lattice, `(T, 2S + 1)`.
pub fn ctc_log_alpha(
    emissions: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::ctc_sequence(emissions, targets)?;
    let expanded = ExpandedTargets::new(&labels);
    sequence_rows(emissions, &expanded)
        .and_then(|rows| Tensor::stack(&rows, 0))
        .map_err(|e| LossError::tensor("ctc forward", e))
}

/// Negative log-probability of `targets` under `emissions` `(T, C)`.
///
/// Each frame's row is computed in one pass of elementwise ops over shifted
/// views of the previous row. Differentiable with respect to `emissions`.
pub fn ctc_forward_score(
    emissions: &Tensor,
    targets: &Tensor,
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::ctc_sequence(emissions, targets)?;
    let expanded = ExpandedTargets::new(&labels);
    tracing::trace!(
        frames = emissions.dims()[0],
        width = expanded.len(),
        "ctc row-vectorized forward"
    );
    sequence_rows(emissions, &expanded)
        .and_then(|rows| sequence_readout(&rows))
        .map_err(|e| LossError::tensor("ctc forward", e))
}

/// Negative log-probabilities `(N,)` for a padded, time-major batch.
///
/// `emissions` is `(T, N, C)` and `targets` `(N, S)`. Every sequence is run
/// over the full padded extent; the score of sequence `n` is read from row
/// `emission_lengths[n] - 1` and columns `2 * target_lengths[n]` and
/// `2 * target_lengths[n] - 1`, so padding never leaks into a shorter
/// sequence.
pub fn ctc_forward_score_batched(
    emissions: &Tensor,
    targets: &Tensor,
    emission_lengths: &[usize],
    target_lengths: &[usize],
) -> std::result::Result<Tensor, LossError> {
    let labels = validate::ctc_batch(emissions, targets, emission_lengths, target_lengths)?;
    let expanded = ExpandedBatch::new(&labels);
    tracing::trace!(
        frames = emissions.dims()[0],
        batch = expanded.batch(),
        width = expanded.width(),
        "ctc batched forward"
    );
    batched_score(emissions, &expanded, emission_lengths)
        .map_err(|e| LossError::tensor("batched ctc forward", e))
}

fn reference_log_alpha(log_probs: &[Vec<f64>], expanded: &ExpandedTargets) -> Vec<Vec<f64>> {
    let frames = log_probs.len();
    let width = expanded.len();
    let symbols = expanded.symbols();
    let rules = expanded.rules();
    let emit = |t: usize, s: usize| log_probs[t][symbols[s] as usize];

    let mut alpha = vec![vec![f64::NEG_INFINITY; width]; frames];
    alpha[0][0] = emit(0, 0);
    if width > 1 {
        alpha[0][1] = emit(0, 1);
    }

    for t in 1..frames {
        for s in 0..width {
            let self_loop = alpha[t - 1][s];
            let prev_symbol = if s >= 1 { alpha[t - 1][s - 1] } else { f64::NEG_INFINITY };
            let skip = if s >= 2 { alpha[t - 1][s - 2] } else { f64::NEG_INFINITY };

            let base = log_add_exp_f64(self_loop, prev_symbol);
            let transition = match rules[s] {
                ColumnRule::Blank | ColumnRule::Repeat => base,
                ColumnRule::Distinct => log_add_exp_f64(base, skip),
            };
            alpha[t][s] = transition + emit(t, s);
        }
    }
    alpha
}

/// Log-probability of ending on the final blank or the final label.
fn reference_readout(lattice: &[Vec<f64>]) -> f64 {
    let last = &lattice[lattice.len() - 1];
    let width = last.len();
    if width == 1 {
        return last[0];
    }
    log_add_exp_f64(last[width - 1], last[width - 2])
}

/// The two column predicates for columns `2..`, as u8 tensors.
struct ColumnMasks {
    blank: Tensor,
    repeat: Tensor,
}

impl ColumnMasks {
    /// `None` when the lattice has no column past the first label.
    fn from_host(
        blank: Vec<u8>,
        repeat: Vec<u8>,
        shape: impl Into<Shape>,
        device: &Device,
    ) -> Result<Option<Self>> {
        if blank.is_empty() {
            return Ok(None);
        }
        let shape = shape.into();
        Ok(Some(Self {
            blank: Tensor::from_vec(blank, shape.clone(), device)?,
            repeat: Tensor::from_vec(repeat, shape, device)?,
        }))
    }
}

fn sequence_rows(emissions: &Tensor, expanded: &ExpandedTargets) -> Result<Vec<Tensor>> {
    let device = emissions.device();
    let width = expanded.len();
    let symbols = Tensor::from_slice(expanded.symbols(), width, device)?;
    let emit = emissions.contiguous()?.index_select(&symbols, 1)?;
    let masks = ColumnMasks::from_host(
        expanded.blank_mask(),
        expanded.repeat_mask(),
        width.saturating_sub(2),
        device,
    )?;
    log_alpha_rows(&emit, masks.as_ref())
}

fn sequence_readout(rows: &[Tensor]) -> Result<Tensor> {
    let last = &rows[rows.len() - 1];
    let width = last.dim(0)?;
    let log_prob = if width == 1 {
        last.squeeze(0)?
    } else {
        let blank = last.narrow(0, width - 1, 1)?;
        let label = last.narrow(0, width - 2, 1)?;
        log_add_exp(&blank, &label)?.squeeze(0)?
    };
    log_prob.neg()
}

fn batched_score(
    emissions: &Tensor,
    expanded: &ExpandedBatch,
    emission_lengths: &[usize],
) -> Result<Tensor> {
    let (frames, batch, _) = emissions.dims3()?;
    let width = expanded.width();
    let device = emissions.device();

    let symbols = Tensor::from_slice(expanded.symbols(), (batch, width), device)?;
    let index = symbols
        .unsqueeze(0)?
        .broadcast_as((frames, batch, width))?
        .contiguous()?;
    let emit = emissions.contiguous()?.gather(&index, 2)?;
    let masks = ColumnMasks::from_host(
        expanded.blank_mask(),
        expanded.repeat_mask(),
        (batch, width.saturating_sub(2)),
        device,
    )?;

    let rows = log_alpha_rows(&emit, masks.as_ref())?;
    let lattice = Tensor::stack(&rows, 1)?;

    let last_frames: Vec<usize> = emission_lengths.iter().map(|&len| len - 1).collect();
    let counts = expanded.label_counts();
    let blank_cols: Vec<usize> = counts.iter().map(|&s| 2 * s).collect();
    let label_cols: Vec<usize> = counts.iter().map(|&s| (2 * s).saturating_sub(1)).collect();

    let last_blank = gather_cells(&lattice, &last_frames, &blank_cols)?;
    let last_label = gather_cells(&lattice, &last_frames, &label_cols)?;
    // an empty target has no final label column
    let has_labels: Vec<u8> = counts.iter().map(|&s| u8::from(s > 0)).collect();
    let has_labels = Tensor::from_vec(has_labels, batch, device)?;
    let last_label = has_labels.where_cond(
        &last_label,
        &neg_inf(batch, last_label.dtype(), device)?,
    )?;
    log_add_exp(&last_blank, &last_label)?.neg()
}

/// Runs the recurrence over `emit`, `(T, ..., W)`, already indexed by the
/// expanded targets. Returns one `(..., W)` row per frame.
fn log_alpha_rows(emit: &Tensor, masks: Option<&ColumnMasks>) -> Result<Vec<Tensor>> {
    let frames = emit.dim(0)?;
    let mut rows = Vec::with_capacity(frames);
    let mut row = initial_row(&emit.get(0)?)?;
    for t in 1..frames {
        let next = advance_row(&row, &emit.get(t)?, masks)?;
        rows.push(row);
        row = next;
    }
    rows.push(row);
    Ok(rows)
}

/// Only the leading blank and the first label are reachable at t = 0.
fn initial_row(emit: &Tensor) -> Result<Tensor> {
    let width = emit.dim(D::Minus1)?;
    let reachable = width.min(2);
    let head = emit.narrow(D::Minus1, 0, reachable)?;
    if reachable == width {
        return Ok(head);
    }
    let mut tail_dims = emit.dims().to_vec();
    if let Some(last) = tail_dims.last_mut() {
        *last = width - reachable;
    }
    let tail = neg_inf(tail_dims, emit.dtype(), emit.device())?;
    Tensor::cat(&[&head, &tail], D::Minus1)
}

fn advance_row(prev: &Tensor, emit: &Tensor, masks: Option<&ColumnMasks>) -> Result<Tensor> {
    let width = prev.dim(D::Minus1)?;
    // the leading blank only loops on itself
    let stay = prev.narrow(D::Minus1, 0, 1)?;
    let transitions = match masks {
        None => stay,
        Some(masks) => {
            // the first label has no skip term
            let first_label = log_add_exp(&prev.narrow(D::Minus1, 1, 1)?, &stay)?;

            let inner = width - 2;
            let self_loop = prev.narrow(D::Minus1, 2, inner)?;
            let prev_symbol = prev.narrow(D::Minus1, 1, inner)?;
            let skip = prev.narrow(D::Minus1, 0, inner)?;

            let base = log_add_exp(&self_loop, &prev_symbol)?;
            let with_skip = log_add_exp(&base, &skip)?;
            // no skips into a blank
            let rest = masks.blank.where_cond(&base, &with_skip)?;
            // a repeated label has to go through the blank between its copies
            let rest = masks.repeat.where_cond(&base, &rest)?;

            Tensor::cat(&[&stay, &first_label, &rest], D::Minus1)?
        }
    };
    transitions.add(emit)
}
