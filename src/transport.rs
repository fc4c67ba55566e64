//! Collective Transport
//!
//! The communication seam of the distributed multiplication: broadcast, variable-length scatter and
//! variable-length gather over flat `f64` buffers.
//!
//! All three operations are synchronous across the whole group: every member must call the same operation in the
//! same relative order, and each call blocks until the group reaches it. A member that never makes the matching
//! call leaves everyone else blocked forever; there is no timeout at this layer. Only contract violations that a
//! member can see locally (a bad layout, a missing root buffer) are reported, and they're reported before blocking.
//!
//! Implementations:
//! - [`crate::transport_serial::SerialTransport`]: a group of one, every collective is a local copy
//! - [`crate::transport_parallel::ParallelTransport`]: ranks as threads of this process
//! - `crate::transport_distributed::DistributedTransport`: ranks as MPI processes (feature `distributed`)
//!

use super::error::{MatmulError, Result};
use super::util::*;
use serde::{Deserialize, Serialize};

/// the identity of one member within a fixed group, established before any computation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessGroup {
    /// zero-based rank of this member
    pub rank: Rank,
    /// number of members
    pub size: usize,
}

impl ProcessGroup {
    pub fn new(rank: Rank, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(MatmulError::Configuration("the process group is empty".to_string()));
        }
        if rank >= size {
            return Err(MatmulError::Configuration(format!(
                "rank {rank} out of range for a group of {size}"
            )));
        }
        Ok(Self { rank, size })
    }

    pub fn solo() -> Self {
        Self { rank: 0, size: 1 }
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == COORDINATOR
    }
}

/// how a flat buffer is cut into one contiguous segment per rank
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentLayout {
    /// number of elements of each rank
    pub counts: Vec<usize>,
    /// index of the first element of each rank; always the prefix sum of `counts`
    pub offsets: Vec<usize>,
}

impl SegmentLayout {
    pub fn from_counts(counts: Vec<usize>) -> Self {
        let offsets = counts
            .iter()
            .scan(0, |acc, &count| {
                let offset = *acc;
                *acc += count;
                Some(offset)
            })
            .collect();
        Self { counts, offsets }
    }

    /// accept explicit offsets only if they're consistent with the counts
    pub fn new(counts: Vec<usize>, offsets: Vec<usize>) -> Result<Self> {
        let layout = Self::from_counts(counts);
        if layout.offsets != offsets {
            return Err(MatmulError::Transport(format!(
                "offsets {:?} are not the prefix sums {:?} of the counts",
                offsets, layout.offsets
            )));
        }
        Ok(layout)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn segment(&self, rank: Rank) -> std::ops::Range<usize> {
        self.offsets[rank]..self.offsets[rank] + self.counts[rank]
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

pub trait CollectiveTransport {
    /// the group this member belongs to; fixed for the lifetime of the transport
    fn group(&self) -> ProcessGroup;

    /// replicate `buffer` of `root` to every member; non-root buffers are replaced, including their length.
    /// the root's buffer is left untouched
    fn broadcast(&self, buffer: &mut Vec<f64>, root: Rank) -> Result<()>;

    /// each member receives `source[layout.segment(rank)]`; only `root` provides `source`
    fn scatter_varying(&self, source: Option<&[f64]>, layout: &SegmentLayout, root: Rank) -> Result<Vec<f64>>;

    /// inverse of [`Self::scatter_varying`]: only `root` gets `Some` of the assembled buffer
    fn gather_varying(&self, local: &[f64], layout: &SegmentLayout, root: Rank) -> Result<Option<Vec<f64>>>;
}

/// contract checks shared by every backend, performed before any blocking
pub mod contract {
    use super::*;

    pub fn check_root(group: &ProcessGroup, root: Rank) -> Result<()> {
        if root >= group.size {
            return Err(MatmulError::Transport(format!(
                "root {root} out of range for a group of {}",
                group.size
            )));
        }
        Ok(())
    }

    pub fn check_layout(group: &ProcessGroup, layout: &SegmentLayout) -> Result<()> {
        if layout.len() != group.size || layout.offsets.len() != group.size {
            return Err(MatmulError::Transport(format!(
                "layout describes {} segments but the group has {} members",
                layout.len(),
                group.size
            )));
        }
        Ok(())
    }

    pub fn check_scatter<'a>(
        group: &ProcessGroup,
        source: Option<&'a [f64]>,
        layout: &SegmentLayout,
        root: Rank,
    ) -> Result<Option<&'a [f64]>> {
        check_root(group, root)?;
        check_layout(group, layout)?;
        if group.rank != root {
            return Ok(None);
        }
        let source = source.ok_or_else(|| MatmulError::Transport("scatter root has no source buffer".to_string()))?;
        if source.len() < layout.total() {
            return Err(MatmulError::Transport(format!(
                "scatter source holds {} elements but the layout needs {}",
                source.len(),
                layout.total()
            )));
        }
        Ok(Some(source))
    }

    pub fn check_gather(group: &ProcessGroup, local: &[f64], layout: &SegmentLayout, root: Rank) -> Result<()> {
        check_root(group, root)?;
        check_layout(group, layout)?;
        if local.len() != layout.counts[group.rank] {
            return Err(MatmulError::Transport(format!(
                "rank {} contributes {} elements to gather but the layout expects {}",
                group.rank,
                local.len(),
                layout.counts[group.rank]
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_process_group_1() {
        // cargo test transport_process_group_1 -- --nocapture
        assert!(ProcessGroup::new(0, 1).unwrap().is_coordinator());
        assert!(!ProcessGroup::new(3, 4).unwrap().is_coordinator());
        assert!(matches!(ProcessGroup::new(4, 4), Err(MatmulError::Configuration(_))));
        assert!(matches!(ProcessGroup::new(0, 0), Err(MatmulError::Configuration(_))));
        assert_eq!(ProcessGroup::solo(), ProcessGroup::new(0, 1).unwrap());
    }

    #[test]
    fn transport_segment_layout_1() {
        // cargo test transport_segment_layout_1 -- --nocapture
        let layout = SegmentLayout::from_counts(vec![2, 0, 3]);
        assert_eq!(layout.offsets, vec![0, 2, 2]);
        assert_eq!(layout.segment(2), 2..5);
        assert_eq!(layout.total(), 5);
        assert!(SegmentLayout::new(vec![2, 0, 3], vec![0, 2, 2]).is_ok());
        assert!(matches!(
            SegmentLayout::new(vec![2, 0, 3], vec![0, 1, 2]),
            Err(MatmulError::Transport(_))
        ));
    }

    #[test]
    fn transport_contract_1() {
        // cargo test transport_contract_1 -- --nocapture
        let root = ProcessGroup::new(0, 2).unwrap();
        let member = ProcessGroup::new(1, 2).unwrap();
        let layout = SegmentLayout::from_counts(vec![2, 2]);
        let source = [1., 2., 3., 4.];
        assert!(contract::check_root(&root, 2).is_err());
        assert!(contract::check_layout(&root, &SegmentLayout::from_counts(vec![4])).is_err());
        assert!(contract::check_scatter(&root, None, &layout, 0).is_err());
        assert!(contract::check_scatter(&root, Some(&source[..3]), &layout, 0).is_err());
        assert_eq!(contract::check_scatter(&root, Some(&source[..]), &layout, 0).unwrap(), Some(&source[..]));
        assert_eq!(contract::check_scatter(&member, None, &layout, 0).unwrap(), None);
        assert!(contract::check_gather(&member, &[1.], &layout, 0).is_err());
        assert!(contract::check_gather(&member, &[1., 2.], &layout, 0).is_ok());
    }
}
