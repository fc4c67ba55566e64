//! Distributed Matrix Multiplication Engine
//!
//! Every rank of the group calls [`DistributedMultiplier::multiply`] with the same `n`; only the coordinator
//! (rank 0) provides the operands. One call runs, on every rank, in this fixed order:
//!
//! 1. local checks: the row partition of `(n, size)` must give every rank at least one row; the coordinator also
//!    checks that both operands are `n x n`
//! 2. handshake: all ranks send their `n` to the coordinator, which broadcasts a verdict, so that a rejection is
//!    returned by every rank instead of leaving the others blocked in the next collective; a bad operand is found
//!    by the coordinator in step 1 but only returned here, because the other ranks cannot see it on their own
//! 3. broadcast `B` from the coordinator
//! 4. scatter the row blocks of `A`
//! 5. multiply the local block by `B`
//! 6. gather the product blocks into the result on the coordinator
//!
//! The elapsed time covers steps 3 to 6. It's measured on every rank but only the coordinator's value is the
//! time of the whole multiplication; on the other ranks it merely tells when that rank finished its part.
//!

use super::error::{MatmulError, Result};
use super::local_multiplier::multiply_block;
use super::matrix::Matrix;
use super::partition::RowPartition;
use super::transport::*;
use super::util::*;
use crate::derivative::Derivative;
use std::time::Instant;

/// the result of one rank: an error is reported through `Err`, never as a missing matrix
#[derive(Debug, Clone, PartialEq)]
pub enum RankResult {
    /// the full product, only ever returned on the coordinator
    Assembled(Matrix),
    /// this rank is not the coordinator and holds no result by design
    NotCoordinator,
}

impl RankResult {
    pub fn is_assembled(&self) -> bool {
        matches!(self, Self::Assembled(_))
    }
    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            Self::Assembled(matrix) => Some(matrix),
            Self::NotCoordinator => None,
        }
    }
    pub fn into_matrix(self) -> Option<Matrix> {
        match self {
            Self::Assembled(matrix) => Some(matrix),
            Self::NotCoordinator => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiplyOutput {
    pub result: RankResult,
    /// seconds spent from the broadcast to the end of the gather; authoritative only on the coordinator
    pub elapsed: f64,
    /// seconds since the broadcast started at which each phase ended
    pub events: Vec<(String, f64)>,
}

const VERDICT_ACCEPTED: u8 = 0;
const VERDICT_BAD_OPERANDS: u8 = 1;
const VERDICT_DIMENSION_DISAGREES: u8 = 2;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct DistributedMultiplier<T: CollectiveTransport> {
    /// the group is fixed at construction and never looked up elsewhere
    group: ProcessGroup,
    #[derivative(Debug = "ignore")]
    transport: T,
}

impl<T: CollectiveTransport> DistributedMultiplier<T> {
    pub fn new(transport: T) -> Self {
        Self {
            group: transport.group(),
            transport,
        }
    }

    pub fn group(&self) -> ProcessGroup {
        self.group
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// multiply `a * b`, both `n x n`; `a` and `b` are read only on the coordinator and may be `None` elsewhere
    pub fn multiply(&self, a: Option<&Matrix>, b: Option<&Matrix>, n: RowNum) -> Result<MultiplyOutput> {
        let group = self.group;
        // every rank computes the same partition and rejects a bad `(n, size)` without communication
        let partition = RowPartition::new(n, group.size)?;
        let operands = if group.is_coordinator() {
            Self::check_operands(a, b, n).map(Some)
        } else {
            Ok(None)
        };
        let operands = self.handshake(n, operands)?;
        let mut b_data = match operands {
            Some((_, b)) => b.data.clone(),
            None => vec![],
        };
        let layout = partition.segment_layout();
        let block = partition.block(group.rank);

        let begin = Instant::now();
        let mut events = Vec::with_capacity(4);
        self.transport.broadcast(&mut b_data, COORDINATOR)?;
        let b_shared = Matrix::from_vec(n, b_data)?;
        events.push(("broadcast".to_string(), begin.elapsed().as_secs_f64()));
        let source = operands.map(|(a, _)| &a.data[..]);
        let local_a = self.transport.scatter_varying(source, &layout, COORDINATOR)?;
        events.push(("scatter".to_string(), begin.elapsed().as_secs_f64()));
        let local_c = multiply_block(&local_a, block.len(), &b_shared)?;
        events.push(("compute".to_string(), begin.elapsed().as_secs_f64()));
        let gathered = self.transport.gather_varying(&local_c, &layout, COORDINATOR)?;
        let elapsed = begin.elapsed().as_secs_f64();
        events.push(("gather".to_string(), elapsed));

        let result = match gathered {
            Some(data) if group.is_coordinator() => RankResult::Assembled(Matrix::from_vec(n, data)?),
            _ => RankResult::NotCoordinator,
        };
        Ok(MultiplyOutput {
            result,
            elapsed,
            events,
        })
    }

    fn check_operands<'a>(
        a: Option<&'a Matrix>,
        b: Option<&'a Matrix>,
        n: RowNum,
    ) -> Result<(&'a Matrix, &'a Matrix)> {
        let a = a.ok_or_else(|| MatmulError::Dimension("the coordinator has no left operand".to_string()))?;
        let b = b.ok_or_else(|| MatmulError::Dimension("the coordinator has no right operand".to_string()))?;
        a.check_dimension(n, "left operand")?;
        b.check_dimension(n, "right operand")?;
        Ok((a, b))
    }

    /// agree on whether this call goes ahead; every rank returns the same kind of error if it doesn't
    fn handshake<'a>(
        &self,
        n: RowNum,
        operands: Result<Option<(&'a Matrix, &'a Matrix)>>,
    ) -> Result<Option<(&'a Matrix, &'a Matrix)>> {
        let group = self.group;
        let layout = SegmentLayout::from_counts(vec![1; group.size]);
        let dimensions = self.transport.gather_varying(&[n as f64], &layout, COORDINATOR)?;
        let mut verdict = match dimensions {
            Some(dimensions) => {
                let disagreeing = dimensions.iter().position(|&dimension| dimension != n as f64);
                match (&operands, disagreeing) {
                    (Err(_), _) => vec![VERDICT_BAD_OPERANDS as f64, 0.],
                    (Ok(_), Some(rank)) => vec![VERDICT_DIMENSION_DISAGREES as f64, rank as f64],
                    (Ok(_), None) => vec![VERDICT_ACCEPTED as f64, 0.],
                }
            }
            None => vec![],
        };
        self.transport.broadcast(&mut verdict, COORDINATOR)?;
        match verdict.first().map(|&status| status as u8) {
            Some(VERDICT_ACCEPTED) => operands,
            Some(VERDICT_BAD_OPERANDS) => match operands {
                Err(err) => Err(err),
                Ok(_) => Err(MatmulError::Dimension(
                    "the coordinator rejected its operands".to_string(),
                )),
            },
            Some(VERDICT_DIMENSION_DISAGREES) => Err(MatmulError::Configuration(format!(
                "rank {} was called with a matrix dimension different from the coordinator's",
                verdict[1] as Rank
            ))),
            _ => Err(MatmulError::Transport(format!("malformed handshake verdict {:?}", verdict))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::serial_multiply;
    use crate::transport_parallel::*;
    use crate::transport_serial::*;

    /// run one multiplication on every rank of a fresh in-process group
    fn run_parallel(a: &Matrix, b: &Matrix, n: RowNum, size: usize) -> Vec<Result<MultiplyOutput>> {
        let group = ParallelGroup::new(size).unwrap();
        group.run(|transport| {
            let multiplier = DistributedMultiplier::new(transport.clone());
            if multiplier.group().is_coordinator() {
                multiplier.multiply(Some(a), Some(b), n)
            } else {
                multiplier.multiply(None, None, n)
            }
        })
    }

    #[test]
    fn engine_serial_transport_1() {
        // cargo test engine_serial_transport_1 -- --nocapture
        let (a, b) = Matrix::random_pair(10, 1);
        let multiplier = DistributedMultiplier::new(SerialTransport::new());
        let output = multiplier.multiply(Some(&a), Some(&b), 10).unwrap();
        let (expected, _) = serial_multiply(&a, &b).unwrap();
        assert_eq!(output.result, RankResult::Assembled(expected));
        assert_eq!(output.events.len(), 4);
        println!("elapsed: {:.3e}, events: {:?}", output.elapsed, output.events);
    }

    #[test]
    fn engine_two_ranks_4x4_1() {
        // cargo test engine_two_ranks_4x4_1 -- --nocapture
        let a = Matrix::from_rows(vec![
            vec![1., 2., 3., 4.],
            vec![5., 6., 7., 8.],
            vec![9., 10., 11., 12.],
            vec![13., 14., 15., 16.],
        ])
        .unwrap();
        let b = Matrix::identity(4);
        let mut outputs = run_parallel(&a, &b, 4, 2).into_iter();
        let coordinator = outputs.next().unwrap().unwrap();
        assert_eq!(coordinator.result.as_matrix(), Some(&a));
        let member = outputs.next().unwrap().unwrap();
        assert_eq!(member.result, RankResult::NotCoordinator);
        assert!(member.result.into_matrix().is_none());
    }

    #[test]
    fn engine_matches_serial_1() {
        // cargo test engine_matches_serial_1 -- --nocapture
        for (n, size) in [(1, 1), (5, 2), (16, 4), (33, 5), (50, 7)] {
            let (a, b) = Matrix::random_pair(n, (n * 100 + size) as u64);
            let (expected, _) = serial_multiply(&a, &b).unwrap();
            let outputs = run_parallel(&a, &b, n, size);
            for (rank, output) in outputs.into_iter().enumerate() {
                let output = output.unwrap();
                if rank == 0 {
                    let product = output.result.as_matrix().unwrap();
                    assert!(product.approx_eq(&expected, 1e-5), "n={n} size={size}");
                    // same accumulation order as the serial reference
                    assert_eq!(product, &expected);
                } else {
                    assert!(!output.result.is_assembled());
                }
            }
        }
    }

    #[test]
    fn engine_operands_unchanged_and_deterministic_1() {
        // cargo test engine_operands_unchanged_and_deterministic_1 -- --nocapture
        let (a, b) = Matrix::random_pair(21, 9);
        let (a_before, b_before) = (a.clone(), b.clone());
        let first = run_parallel(&a, &b, 21, 4).remove(0).unwrap();
        let second = run_parallel(&a, &b, 21, 4).remove(0).unwrap();
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
        let (first, second) = (first.result.into_matrix().unwrap(), second.result.into_matrix().unwrap());
        assert!(first.data.iter().zip(second.data.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn engine_repeated_calls_1() {
        // cargo test engine_repeated_calls_1 -- --nocapture
        let group = ParallelGroup::new(3).unwrap();
        let inputs: Vec<_> = [3, 8, 20].iter().map(|&n| (n, Matrix::random_pair(n, n as u64))).collect();
        let outputs = group.run(|transport| {
            let multiplier = DistributedMultiplier::new(transport.clone());
            let mut products = vec![];
            for (n, (a, b)) in inputs.iter() {
                let output = if multiplier.group().is_coordinator() {
                    multiplier.multiply(Some(a), Some(b), *n).unwrap()
                } else {
                    multiplier.multiply(None, None, *n).unwrap()
                };
                products.push(output.result);
            }
            products
        });
        for (index, (_, (a, b))) in inputs.iter().enumerate() {
            let (expected, _) = serial_multiply(a, b).unwrap();
            assert_eq!(outputs[0][index], RankResult::Assembled(expected));
            assert_eq!(outputs[1][index], RankResult::NotCoordinator);
            assert_eq!(outputs[2][index], RankResult::NotCoordinator);
        }
    }

    #[test]
    fn engine_rejects_small_matrix_on_every_rank_1() {
        // cargo test engine_rejects_small_matrix_on_every_rank_1 -- --nocapture
        let (a, b) = Matrix::random_pair(2, 0);
        for output in run_parallel(&a, &b, 2, 4) {
            assert!(matches!(output, Err(MatmulError::Configuration(_))));
        }
    }

    #[test]
    fn engine_rejects_bad_operands_on_every_rank_1() {
        // cargo test engine_rejects_bad_operands_on_every_rank_1 -- --nocapture
        let a = Matrix::random(6, 0);
        let b = Matrix::random(5, 1);
        for output in run_parallel(&a, &b, 6, 3) {
            assert!(matches!(output, Err(MatmulError::Dimension(_))));
        }
        let group = ParallelGroup::new(2).unwrap();
        let outputs = group.run(|transport| DistributedMultiplier::new(transport.clone()).multiply(Some(&a), None, 6));
        for output in outputs {
            assert!(matches!(output, Err(MatmulError::Dimension(_))));
        }
    }

    #[test]
    fn engine_rejects_disagreeing_dimension_1() {
        // cargo test engine_rejects_disagreeing_dimension_1 -- --nocapture
        let (a, b) = Matrix::random_pair(8, 2);
        let group = ParallelGroup::new(3).unwrap();
        let outputs = group.run(|transport| {
            let multiplier = DistributedMultiplier::new(transport.clone());
            match multiplier.group().rank {
                0 => multiplier.multiply(Some(&a), Some(&b), 8),
                1 => multiplier.multiply(None, None, 8),
                _ => multiplier.multiply(None, None, 9),
            }
        });
        for output in outputs {
            match output {
                Err(MatmulError::Configuration(message)) => assert!(message.contains("rank 2"), "{message}"),
                other => panic!("unexpected {:?}", other.map(|output| output.result)),
            }
        }
    }
}
