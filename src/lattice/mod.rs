pub mod ctc;
pub mod expand;
pub mod logspace;
pub mod scan;
pub mod transducer;
pub(crate) mod validate;

use candle_core::{Result, Tensor};

/// Picks `lattice[n, rows[n], cols[n]]` for every sequence of an `(N, T, S)`
/// lattice, giving an `(N,)` tensor.
pub(crate) fn gather_cells(lattice: &Tensor, rows: &[usize], cols: &[usize]) -> Result<Tensor> {
    let (batch, _, width) = lattice.dims3()?;
    let device = lattice.device();
    let row_index: Vec<u32> = rows.iter().map(|&r| r as u32).collect();
    let row_index = Tensor::from_vec(row_index, (batch, 1, 1), device)?
        .broadcast_as((batch, 1, width))?
        .contiguous()?;
    let picked = lattice.contiguous()?.gather(&row_index, 1)?.squeeze(1)?;
    let col_index: Vec<u32> = cols.iter().map(|&c| c as u32).collect();
    let col_index = Tensor::from_vec(col_index, (batch, 1), device)?;
    picked.gather(&col_index, 1)?.squeeze(1)
}
