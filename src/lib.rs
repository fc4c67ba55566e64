extern crate cfg_if;
extern crate rand_xoshiro;
extern crate parking_lot;
extern crate serde;
#[macro_use] extern crate serde_json;
extern crate chrono;
extern crate derivative;
extern crate pbr;
extern crate plotters;
extern crate rayon;
extern crate thiserror;

pub mod error;
pub mod util;
pub mod matrix;
pub mod partition;
pub mod transport;
pub mod transport_serial;
pub mod transport_parallel;
pub mod local_multiplier;
pub mod serial;
pub mod engine;
pub mod benchmark;
pub mod report;

cfg_if::cfg_if! {
    if #[cfg(feature = "distributed")] {
        extern crate mpi;
        pub mod transport_distributed;
    }
}

use error::Result;
use matrix::Matrix;

/// multiply `a * b` on an in-process group of `processes` ranks, returning the product and the elapsed seconds
/// (to run many products, consider reusing a [`transport_parallel::ParallelGroup`] with [`benchmark::multiply_on_group`])
pub fn distributed_multiply(a: &Matrix, b: &Matrix, processes: usize) -> Result<(Matrix, f64)> {
    let group = transport_parallel::ParallelGroup::new(processes)?;
    let output = benchmark::multiply_on_group(&group, a, b)?;
    match output.result {
        engine::RankResult::Assembled(product) => Ok((product, output.elapsed)),
        engine::RankResult::NotCoordinator => Err(error::MatmulError::Transport(
            "the coordinator returned no product".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributed_multiply_1() {
        // cargo test distributed_multiply_1 -- --nocapture
        let a = Matrix::from_rows(vec![vec![1., 2.], vec![3., 4.]]).unwrap();
        let b = Matrix::from_rows(vec![vec![5., 6.], vec![7., 8.]]).unwrap();
        let (product, elapsed) = distributed_multiply(&a, &b, 2).unwrap();
        assert_eq!(product.data, vec![19., 22., 43., 50.]);
        assert!(elapsed >= 0.);
        assert!(distributed_multiply(&a, &b, 3).is_err());
        assert!(distributed_multiply(&a, &b, 0).is_err());
    }
}
