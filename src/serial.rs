//! Serial Baseline
//!
//! The single-process product used as the timing baseline and as the trusted result during verification.
//!

use super::error::Result;
use super::local_multiplier::multiply_block;
use super::matrix::Matrix;
use std::time::Instant;

/// compute `a * b` on the current thread, returning the product and the elapsed seconds
pub fn serial_multiply(a: &Matrix, b: &Matrix) -> Result<(Matrix, f64)> {
    a.check_dimension(b.n, "left operand")?;
    let begin = Instant::now();
    let data = multiply_block(&a.data, a.n, b)?;
    let elapsed = begin.elapsed().as_secs_f64();
    Ok((Matrix::from_vec(a.n, data)?, elapsed))
}
