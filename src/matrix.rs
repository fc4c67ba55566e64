//! Dense Matrix
//!
//! Square, row-major matrices of `f64`; the only shape this crate multiplies.
//!

use super::error::{MatmulError, Result};
use super::util::*;
use crate::rand_xoshiro::rand_core::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    /// number of rows, equal to the number of columns
    pub n: RowNum,
    /// `n * n` elements, row after row
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(n: RowNum) -> Self {
        Self { n, data: vec![0.; n * n] }
    }

    pub fn identity(n: RowNum) -> Self {
        let mut matrix = Self::zeros(n);
        for i in 0..n {
            matrix.data[i * n + i] = 1.;
        }
        matrix
    }

    /// wrap a flat row-major buffer, which must hold exactly `n * n` elements
    pub fn from_vec(n: RowNum, data: Vec<f64>) -> Result<Self> {
        if data.len() != n * n {
            return Err(MatmulError::Dimension(format!(
                "a {n}x{n} matrix needs {} elements, got {}",
                n * n,
                data.len()
            )));
        }
        Ok(Self { n, data })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n {
                return Err(MatmulError::Dimension(format!(
                    "row {i} has {} columns but the matrix has {n} rows",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Ok(Self { n, data })
    }

    /// uniformly random elements in `[0, 1)`, reproducible given the seed
    pub fn random(n: RowNum, seed: u64) -> Self {
        let mut rng = DeterministicRng::seed_from_u64(seed);
        let data = (0..n * n).map(|_| rng.next_f64()).collect();
        Self { n, data }
    }

    /// a pair of independent random operands
    pub fn random_pair(n: RowNum, seed: u64) -> (Self, Self) {
        (Self::random(n, seed), Self::random(n, seed.wrapping_add(1)))
    }

    pub fn get(&self, i: RowIndex, j: RowIndex) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: RowIndex, j: RowIndex, value: f64) {
        self.data[i * self.n + j] = value;
    }

    pub fn row(&self, i: RowIndex) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// contiguous slice of the given rows
    pub fn rows(&self, range: RowRange) -> &[f64] {
        &self.data[range.element_range(self.n)]
    }

    /// a matrix is usable as an operand of dimension `n` only if it's square and of that size
    pub fn check_dimension(&self, n: RowNum, name: &str) -> Result<()> {
        if self.data.len() != self.n * self.n {
            return Err(MatmulError::Dimension(format!(
                "{name} claims to be {0}x{0} but holds {1} elements",
                self.n,
                self.data.len()
            )));
        }
        if self.n != n {
            return Err(MatmulError::Dimension(format!(
                "{name} is {0}x{0} but the problem size is {n}",
                self.n
            )));
        }
        Ok(())
    }

    /// the largest element-wise difference, scaled relative to the magnitude when it exceeds 1
    pub fn max_deviation(&self, other: &Self) -> f64 {
        assert_eq!(self.n, other.n, "cannot compare matrices of different dimension");
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs() / f64::max(1., b.abs()))
            .fold(0., f64::max)
    }

    /// true if every element agrees within `tolerance`, absolute for small values and relative for large ones
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.n == other.n && self.max_deviation(other) <= tolerance
    }
}
