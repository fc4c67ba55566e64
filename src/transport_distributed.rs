//! Distributed Transport
//!
//! Collectives over an MPI communicator, one operating system process per rank.
//!
//! The communicator is initialized by the caller (`mpi::initialize()`) and the returned universe must outlive
//! the transport. Variable-count collectives map one to one onto `MPI_Scatterv` and `MPI_Gatherv`; a broadcast
//! first agrees on the buffer length so that non-root ranks may start with an empty buffer.
//!

use super::error::{MatmulError, Result};
use super::transport::*;
use super::util::*;
use crate::derivative::Derivative;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct DistributedTransport {
    group: ProcessGroup,
    #[derivative(Debug = "ignore")]
    world: SimpleCommunicator,
}

impl DistributedTransport {
    pub fn new(world: SimpleCommunicator) -> Result<Self> {
        let group = ProcessGroup::new(world.rank() as Rank, world.size() as usize)?;
        Ok(Self { group, world })
    }

    pub fn world(&self) -> &SimpleCommunicator {
        &self.world
    }
}

fn to_count(value: usize) -> Result<Count> {
    Count::try_from(value).map_err(|_| MatmulError::Transport(format!("{value} elements exceed an MPI count")))
}

fn to_counts(values: &[usize]) -> Result<Vec<Count>> {
    values.iter().map(|&value| to_count(value)).collect()
}

impl CollectiveTransport for DistributedTransport {
    fn group(&self) -> ProcessGroup {
        self.group
    }

    fn broadcast(&self, buffer: &mut Vec<f64>, root: Rank) -> Result<()> {
        contract::check_root(&self.group, root)?;
        let root_process = self.world.process_at_rank(root as Count);
        let mut length = buffer.len() as u64;
        root_process.broadcast_into(&mut length);
        buffer.resize(length as usize, 0.);
        root_process.broadcast_into(&mut buffer[..]);
        Ok(())
    }

    fn scatter_varying(&self, source: Option<&[f64]>, layout: &SegmentLayout, root: Rank) -> Result<Vec<f64>> {
        let source = contract::check_scatter(&self.group, source, layout, root)?;
        let root_process = self.world.process_at_rank(root as Count);
        let mut local = vec![0.; layout.counts[self.group.rank]];
        match source {
            Some(source) => {
                let counts = to_counts(&layout.counts)?;
                let offsets = to_counts(&layout.offsets)?;
                let partition = Partition::new(&source[..layout.total()], counts, offsets);
                root_process.scatter_varcount_into_root(&partition, &mut local[..]);
            }
            None => root_process.scatter_varcount_into(&mut local[..]),
        }
        Ok(local)
    }

    fn gather_varying(&self, local: &[f64], layout: &SegmentLayout, root: Rank) -> Result<Option<Vec<f64>>> {
        contract::check_gather(&self.group, local, layout, root)?;
        let root_process = self.world.process_at_rank(root as Count);
        if self.group.rank != root {
            root_process.gather_varcount_into(local);
            return Ok(None);
        }
        let counts = to_counts(&layout.counts)?;
        let offsets = to_counts(&layout.offsets)?;
        let mut assembled = vec![0.; layout.total()];
        {
            let mut partition = PartitionMut::new(&mut assembled[..], counts, offsets);
            root_process.gather_varcount_into_root(local, &mut partition);
        }
        Ok(Some(assembled))
    }
}
