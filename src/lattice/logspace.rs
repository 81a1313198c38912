use candle_core::{DType, Device, Result, Shape, Tensor};

/// A tensor filled with −∞, the log-space value of an unreachable state.
pub fn neg_inf(shape: impl Into<Shape>, dtype: DType, device: &Device) -> Result<Tensor> {
    Tensor::zeros(shape, dtype, device)?.affine(1.0, f64::NEG_INFINITY)
}

/// Elementwise `log(exp(a) + exp(b))`.
///
/// Computed as `max(a, b) + log(1 + exp(-|a - b|))`. Cells where both sides
/// are −∞ are routed around the subtraction so they stay −∞ and carry a zero
/// gradient instead of NaN. NaN in either input reaches the output through the
/// difference term.
pub fn log_add_exp(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let floor = neg_inf(a.shape(), a.dtype(), a.device())?;
    let unreachable = a.eq(&floor)?.mul(&b.eq(&floor)?)?;
    let diff = unreachable.where_cond(&a.zeros_like()?, &a.sub(b)?)?;
    let correction = diff.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let summed = a.maximum(b)?.add(&correction)?;
    unreachable.where_cond(&floor, &summed)
}

/// Host counterpart of [`log_add_exp`].
pub fn log_add_exp_f64(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    let max = a.max(b);
    max + (-(a - b).abs()).exp().ln_1p()
}
