//! First-order affine recurrences `a[i] = a[i-1] * mult[i] + add[i]`.
//!
//! Each step is an affine map `x -> mult * x + add`. Composing two maps gives
//! another affine map and the composition is associative, so all prefixes of
//! a sequence of steps can be combined in logarithmic depth instead of a
//! strictly left-to-right fold. Both forms are provided here, on host values
//! and on tensors, and are interchangeable.

use candle_core::{Result, Tensor, D};

/// One step `x -> mult * x + add`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineStep {
    pub mult: f64,
    pub add: f64,
}

impl AffineStep {
    pub const IDENTITY: AffineStep = AffineStep { mult: 1.0, add: 0.0 };

    pub fn new(mult: f64, add: f64) -> Self {
        Self { mult, add }
    }

    /// `self` followed by `next`.
    pub fn then(self, next: AffineStep) -> AffineStep {
        AffineStep {
            mult: next.mult * self.mult,
            add: next.mult * self.add + next.add,
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        self.mult * x + self.add
    }
}

/// Lazy left-to-right evaluation, yielding `a0, a1, ..., an`.
#[derive(Debug, Clone)]
pub struct AffineRecurrence<'a> {
    mult: &'a [f64],
    add: &'a [f64],
    state: Option<f64>,
    next: usize,
}

impl<'a> AffineRecurrence<'a> {
    /// # Panics
    ///
    /// Panics if `mult` and `add` differ in length.
    pub fn new(mult: &'a [f64], add: &'a [f64], init: f64) -> Self {
        assert_eq!(mult.len(), add.len(), "mult and add must have equal length");
        Self {
            mult,
            add,
            state: Some(init),
            next: 0,
        }
    }
}

impl Iterator for AffineRecurrence<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let current = self.state?;
        self.state = if self.next < self.mult.len() {
            let i = self.next;
            self.next += 1;
            Some(current * self.mult[i] + self.add[i])
        } else {
            None
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = if self.state.is_some() {
            self.mult.len() - self.next + 1
        } else {
            0
        };
        (left, Some(left))
    }
}

impl ExactSizeIterator for AffineRecurrence<'_> {}

/// `[a0, a1, ..., an]`, evaluated strictly left to right.
pub fn scan_sequential(mult: &[f64], add: &[f64], init: f64) -> Vec<f64> {
    AffineRecurrence::new(mult, add, init).collect()
}

/// `[a0, a1, ..., an]`, evaluated through prefix composition of the steps.
///
/// Work-efficient inclusive scan: an up-sweep builds partial compositions on a
/// binary tree, a down-sweep fills in the remaining prefixes. Every level only
/// combines independent pairs.
///
/// # Panics
///
/// Panics if `mult` and `add` differ in length.
pub fn scan_associative(mult: &[f64], add: &[f64], init: f64) -> Vec<f64> {
    assert_eq!(mult.len(), add.len(), "mult and add must have equal length");
    let n = mult.len();
    let mut prefix: Vec<AffineStep> = mult
        .iter()
        .zip(add)
        .map(|(&m, &a)| AffineStep::new(m, a))
        .collect();

    let mut stride = 1;
    while stride < n {
        let mut i = 2 * stride - 1;
        while i < n {
            prefix[i] = prefix[i - stride].then(prefix[i]);
            i += 2 * stride;
        }
        stride *= 2;
    }

    stride /= 2;
    while stride >= 1 {
        let mut i = 3 * stride - 1;
        while i < n {
            prefix[i] = prefix[i - stride].then(prefix[i]);
            i += 2 * stride;
        }
        stride /= 2;
    }

    std::iter::once(init)
        .chain(prefix.into_iter().map(|step| step.apply(init)))
        .collect()
}

/// Tensor form of [`scan_sequential`] over the last dimension.
///
/// `mult` and `add` are `(..., n)`, `init` is `(...)`; the result is
/// `(..., n + 1)` with `init` in position 0.
pub fn affine_fold(mult: &Tensor, add: &Tensor, init: &Tensor) -> Result<Tensor> {
    let n = mult.dim(D::Minus1)?;
    let mut state = init.unsqueeze(init.rank())?;
    let mut states = Vec::with_capacity(n + 1);
    states.push(state.clone());
    for i in 0..n {
        let m = mult.narrow(D::Minus1, i, 1)?;
        let a = add.narrow(D::Minus1, i, 1)?;
        state = state.mul(&m)?.add(&a)?;
        states.push(state.clone());
    }
    Tensor::cat(&states, D::Minus1)
}

/// Tensor form of [`scan_associative`] over the last dimension.
///
/// Hillis–Steele doubling: after the pass with offset `d`, position `i` holds
/// the composition of steps `i - 2d + 1 ..= i`. `ceil(log2 n)` passes, each a
/// handful of elementwise ops over the whole row.
pub fn affine_scan(mult: &Tensor, add: &Tensor, init: &Tensor) -> Result<Tensor> {
    let n = mult.dim(D::Minus1)?;
    let init = init.unsqueeze(init.rank())?;
    if n == 0 {
        return Ok(init);
    }
    let mut prefix_mult = mult.clone();
    let mut prefix_add = add.clone();
    let mut offset = 1;
    while offset < n {
        let kept = n - offset;
        let earlier_mult = prefix_mult.narrow(D::Minus1, 0, kept)?;
        let earlier_add = prefix_add.narrow(D::Minus1, 0, kept)?;
        let later_mult = prefix_mult.narrow(D::Minus1, offset, kept)?;
        let later_add = prefix_add.narrow(D::Minus1, offset, kept)?;

        let joined_mult = later_mult.mul(&earlier_mult)?;
        let joined_add = later_mult.mul(&earlier_add)?.add(&later_add)?;

        prefix_mult = Tensor::cat(
            &[&prefix_mult.narrow(D::Minus1, 0, offset)?, &joined_mult],
            D::Minus1,
        )?;
        prefix_add = Tensor::cat(
            &[&prefix_add.narrow(D::Minus1, 0, offset)?, &joined_add],
            D::Minus1,
        )?;
        offset *= 2;
    }
    let states = prefix_mult.broadcast_mul(&init)?.add(&prefix_add)?;
    Tensor::cat(&[&init, &states], D::Minus1)
}
