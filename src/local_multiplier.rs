//! Local Multiplier
//!
//! Dense product of one row block against the full right operand, computed by a single rank.
//!
//! The loops run in i-k-j order so the innermost loop walks both `B` and the output row contiguously.
//! Every output element is still accumulated as `0 + a[i][0] * b[0][j] + a[i][1] * b[1][j] + ...` in increasing `k`,
//! i.e. the same sequence of floating point operations as a row-times-column dot product, so a block computed here
//! is bit-identical to the same rows of a serial product.
//!

use super::error::{MatmulError, Result};
use super::matrix::Matrix;
use super::util::*;

/// `block` holds `rows` consecutive rows of the left operand; returns the `rows x n` product `block * b`
pub fn multiply_block(block: &[f64], rows: RowNum, b: &Matrix) -> Result<Vec<f64>> {
    let n = b.n;
    if block.len() != rows * n {
        return Err(MatmulError::Dimension(format!(
            "a block of {rows} rows of width {n} needs {} elements, got {}",
            rows * n,
            block.len()
        )));
    }
    b.check_dimension(n, "right operand")?;
    let mut product = vec![0.; rows * n];
    multiply_block_into(block, &b.data, &mut product, rows, n);
    Ok(product)
}

/// accumulate `a * b` into `c`, where `a` is `rows x n`, `b` is `n x n` and `c` is `rows x n`
#[inline]
pub fn multiply_block_into(a: &[f64], b: &[f64], c: &mut [f64], rows: RowNum, n: RowNum) {
    debug_assert_eq!(a.len(), rows * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), rows * n);
    for i in 0..rows {
        let c_row = &mut c[i * n..(i + 1) * n];
        for k in 0..n {
            let a_ik = a[i * n + k];
            let b_row = &b[k * n..(k + 1) * n];
            for (c_ij, b_kj) in c_row.iter_mut().zip(b_row.iter()) {
                *c_ij += a_ik * b_kj;
            }
        }
    }
}
