//! Parallel Transport
//!
//! An in-process process group: every rank runs on its own thread and the collectives meet at a shared rendezvous.
//!
//! The ranks never share matrix memory: whatever a collective delivers to a rank is that rank's own copy, so the
//! data flow is the same as with separate processes and the engine can be tested without launching any.
//! Each collective is one round of the rendezvous: every rank deposits its contribution (or nothing), the last
//! rank to arrive publishes the round and wakes everyone, and each rank picks what it needs from the published
//! round. A rank that never arrives blocks the others forever, exactly like a real message-passing group.
//!

use super::error::{MatmulError, Result};
use super::transport::*;
use super::util::*;
use crate::derivative::Derivative;
use crate::parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// which collective a rank is calling, so that mismatched calls are reported instead of mixing data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveKind {
    Broadcast { root: Rank },
    Scatter { root: Rank },
    Gather { root: Rank },
}

type Contribution = Option<(CollectiveKind, Option<Arc<Vec<f64>>>)>;

/// the result of a completed round: the contribution of every rank
pub type Round = Arc<Vec<Contribution>>;

struct RendezvousState {
    /// contributions of the round in progress
    slots: Vec<Contribution>,
    /// how many ranks have deposited in the round in progress
    arrived: usize,
    /// number of completed rounds
    generation: u64,
    /// the last completed round
    completed: Round,
}

pub struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    condvar: Condvar,
}

impl Rendezvous {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(RendezvousState {
                slots: vec![None; size],
                arrived: 0,
                generation: 0,
                completed: Arc::new(vec![]),
            }),
            condvar: Condvar::new(),
        }
    }

    /// deposit a contribution and block until every rank of the group has deposited in the same round
    pub fn exchange(&self, rank: Rank, kind: CollectiveKind, data: Option<Vec<f64>>) -> Result<Round> {
        let mut state = self.state.lock();
        let generation = state.generation;
        debug_assert!(state.slots[rank].is_none(), "rank {} deposited twice in one round", rank);
        state.slots[rank] = Some((kind, data.map(Arc::new)));
        state.arrived += 1;
        if state.arrived == self.size {
            let slots = std::mem::replace(&mut state.slots, vec![None; self.size]);
            state.completed = Arc::new(slots);
            state.arrived = 0;
            state.generation += 1;
            self.condvar.notify_all();
        } else {
            // the next round cannot complete before this rank joins it, so `completed` is still ours after waking
            while state.generation == generation {
                self.condvar.wait(&mut state);
            }
        }
        let round = state.completed.clone();
        drop(state);
        for (peer, contribution) in round.iter().enumerate() {
            match contribution {
                Some((peer_kind, _)) if *peer_kind == kind => {}
                Some((peer_kind, _)) => {
                    return Err(MatmulError::Transport(format!(
                        "collective mismatch: rank {rank} called {kind:?} while rank {peer} called {peer_kind:?}"
                    )))
                }
                None => unreachable!("a round completes only when every rank has deposited"),
            }
        }
        Ok(round)
    }
}

/// the payload deposited by `rank` in a completed round
fn payload_of(round: &Round, rank: Rank) -> Result<&Arc<Vec<f64>>> {
    round[rank]
        .as_ref()
        .and_then(|(_, data)| data.as_ref())
        .ok_or_else(|| MatmulError::Transport(format!("rank {rank} deposited no data")))
}

/// one rank's handle into an in-process group
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ParallelTransport {
    group: ProcessGroup,
    #[derivative(Debug = "ignore")]
    rendezvous: Arc<Rendezvous>,
}

impl CollectiveTransport for ParallelTransport {
    fn group(&self) -> ProcessGroup {
        self.group
    }

    fn broadcast(&self, buffer: &mut Vec<f64>, root: Rank) -> Result<()> {
        contract::check_root(&self.group, root)?;
        let is_root = self.group.rank == root;
        let contribution = if is_root { Some(buffer.clone()) } else { None };
        let round = self
            .rendezvous
            .exchange(self.group.rank, CollectiveKind::Broadcast { root }, contribution)?;
        if !is_root {
            let payload = payload_of(&round, root)?;
            buffer.clear();
            buffer.extend_from_slice(payload);
        }
        Ok(())
    }

    fn scatter_varying(&self, source: Option<&[f64]>, layout: &SegmentLayout, root: Rank) -> Result<Vec<f64>> {
        let source = contract::check_scatter(&self.group, source, layout, root)?;
        let contribution = source.map(|source| source[..layout.total()].to_vec());
        let round = self
            .rendezvous
            .exchange(self.group.rank, CollectiveKind::Scatter { root }, contribution)?;
        let payload = payload_of(&round, root)?;
        let segment = layout.segment(self.group.rank);
        if segment.end > payload.len() {
            return Err(MatmulError::Transport(format!(
                "rank {} expects elements {:?} but the root scattered only {}",
                self.group.rank,
                segment,
                payload.len()
            )));
        }
        Ok(payload[segment].to_vec())
    }

    fn gather_varying(&self, local: &[f64], layout: &SegmentLayout, root: Rank) -> Result<Option<Vec<f64>>> {
        contract::check_gather(&self.group, local, layout, root)?;
        let round = self
            .rendezvous
            .exchange(self.group.rank, CollectiveKind::Gather { root }, Some(local.to_vec()))?;
        if self.group.rank != root {
            return Ok(None);
        }
        let mut assembled = vec![0.; layout.total()];
        for rank in 0..self.group.size {
            let payload = payload_of(&round, rank)?;
            if payload.len() != layout.counts[rank] {
                return Err(MatmulError::Transport(format!(
                    "rank {rank} contributed {} elements but the root expects {}",
                    payload.len(),
                    layout.counts[rank]
                )));
            }
            assembled[layout.segment(rank)].copy_from_slice(payload);
        }
        Ok(Some(assembled))
    }
}

/// a fixed group of ranks living in this process, each with a dedicated thread
pub struct ParallelGroup {
    /// one handle per rank, in rank order
    pub transports: Vec<ParallelTransport>,
    /// exactly one thread per rank: collectives block, so ranks must never share a thread
    pub thread_pool: rayon::ThreadPool,
}

impl ParallelGroup {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(MatmulError::Configuration("the process group is empty".to_string()));
        }
        let rendezvous = Arc::new(Rendezvous::new(size));
        let transports = (0..size)
            .map(|rank| ParallelTransport {
                group: ProcessGroup { rank, size },
                rendezvous: rendezvous.clone(),
            })
            .collect();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("rank-{index}"))
            .build()
            .map_err(|err| MatmulError::Transport(format!("creating thread pool failed: {err}")))?;
        Ok(Self {
            transports,
            thread_pool,
        })
    }

    pub fn size(&self) -> usize {
        self.transports.len()
    }

    /// run `rank_main` once on every rank concurrently and collect the return values in rank order
    pub fn run<F, R>(&self, rank_main: F) -> Vec<R>
    where
        F: Fn(&ParallelTransport) -> R + Sync,
        R: Send,
    {
        self.thread_pool
            .broadcast(|context| rank_main(&self.transports[context.index()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parallel_broadcast_1() {
        // cargo test transport_parallel_broadcast_1 -- --nocapture
        let group = ParallelGroup::new(4).unwrap();
        let results = group.run(|transport| {
            let mut buffer = if transport.group().is_coordinator() {
                vec![1., 2., 3.]
            } else {
                vec![9.; 7]
            };
            transport.broadcast(&mut buffer, 0).unwrap();
            buffer
        });
        for buffer in results {
            assert_eq!(buffer, vec![1., 2., 3.]);
        }
    }

    #[test]
    fn transport_parallel_scatter_gather_1() {
        // cargo test transport_parallel_scatter_gather_1 -- --nocapture
        let size = 3;
        let group = ParallelGroup::new(size).unwrap();
        let layout = SegmentLayout::from_counts(vec![1, 2, 3]);
        let source: Vec<f64> = (0..6).map(|value| value as f64).collect();
        let results = group.run(|transport| {
            let rank = transport.group().rank;
            let root_source = if rank == 0 { Some(&source[..]) } else { None };
            let local = transport.scatter_varying(root_source, &layout, 0).unwrap();
            let doubled: Vec<f64> = local.iter().map(|value| value * 2.).collect();
            (local, transport.gather_varying(&doubled, &layout, 0).unwrap())
        });
        assert_eq!(results[0].0, vec![0.]);
        assert_eq!(results[1].0, vec![1., 2.]);
        assert_eq!(results[2].0, vec![3., 4., 5.]);
        assert_eq!(results[0].1, Some(vec![0., 2., 4., 6., 8., 10.]));
        assert_eq!(results[1].1, None);
        assert_eq!(results[2].1, None);
    }

    #[test]
    fn transport_parallel_non_zero_root_1() {
        // cargo test transport_parallel_non_zero_root_1 -- --nocapture
        let group = ParallelGroup::new(2).unwrap();
        let layout = SegmentLayout::from_counts(vec![2, 1]);
        let results = group.run(|transport| {
            let rank = transport.group().rank;
            let local = vec![rank as f64 + 1.; layout.counts[rank]];
            transport.gather_varying(&local, &layout, 1).unwrap()
        });
        assert_eq!(results[0], None);
        assert_eq!(results[1], Some(vec![1., 1., 2.]));
    }

    #[test]
    fn transport_parallel_many_rounds_1() {
        // cargo test transport_parallel_many_rounds_1 -- --nocapture
        let group = ParallelGroup::new(5).unwrap();
        let results = group.run(|transport| {
            let mut last = vec![];
            for round in 0..200 {
                let root = round % 5;
                let mut buffer = if transport.group().rank == root { vec![round as f64] } else { vec![] };
                transport.broadcast(&mut buffer, root).unwrap();
                assert_eq!(buffer, vec![round as f64]);
                last = buffer;
            }
            last
        });
        assert!(results.iter().all(|buffer| buffer == &vec![199.]));
    }

    #[test]
    fn transport_parallel_mismatch_1() {
        // cargo test transport_parallel_mismatch_1 -- --nocapture
        let group = ParallelGroup::new(2).unwrap();
        let layout = SegmentLayout::from_counts(vec![1, 1]);
        let results = group.run(|transport| {
            if transport.group().rank == 0 {
                let mut buffer = vec![1.];
                transport.broadcast(&mut buffer, 0).map(|_| ())
            } else {
                transport.gather_varying(&[1.], &layout, 0).map(|_| ())
            }
        });
        for result in results {
            assert!(matches!(result, Err(MatmulError::Transport(_))));
        }
    }

    #[test]
    fn transport_parallel_inconsistent_layouts_1() {
        // cargo test transport_parallel_inconsistent_layouts_1 -- --nocapture
        let group = ParallelGroup::new(2).unwrap();
        let layouts = [SegmentLayout::from_counts(vec![1, 1]), SegmentLayout::from_counts(vec![1, 2])];
        let results = group.run(|transport| {
            let rank = transport.group().rank;
            let local = vec![rank as f64; layouts[rank].counts[rank]];
            transport.gather_varying(&local, &layouts[rank], 0)
        });
        assert!(matches!(results[0], Err(MatmulError::Transport(_))));
        assert!(matches!(results[1], Ok(None)));
        let source = [1., 2.];
        let results = group.run(|transport| {
            let rank = transport.group().rank;
            let root_source = if rank == 0 { Some(&source[..]) } else { None };
            transport.scatter_varying(root_source, &layouts[rank], 0)
        });
        assert_eq!(results[0].as_ref().unwrap(), &vec![1.]);
        assert!(matches!(results[1], Err(MatmulError::Transport(_))));
    }
}
