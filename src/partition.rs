//! Row Block Partition
//!
//! Divides the rows of an `n x n` matrix into one contiguous block per rank.
//!
//! Every rank `r < size - 1` owns `n / size` rows starting at `r * (n / size)`; the last rank owns everything left,
//! so when `n` is not divisible by `size` the whole remainder lands on the last rank.
//! The layout is a pure function of `(n, size)`: every rank computes it locally and gets the same answer without
//! talking to anyone.
//!

use super::error::{MatmulError, Result};
use super::transport::SegmentLayout;
use super::util::*;
use serde::Serialize;

/// built only through [`RowPartition::new`]; serialized for display but never read back
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RowPartition {
    /// the matrix dimension
    pub n: RowNum,
    /// the number of ranks
    pub size: usize,
    /// the rows owned by each rank, in rank order
    pub blocks: Vec<RowRange>,
}

impl RowPartition {
    /// the raw row ranges, without rejecting degenerate cases where some ranks own no rows (`n < size`)
    pub fn layout(n: RowNum, size: usize) -> Vec<RowRange> {
        if size == 0 {
            return vec![];
        }
        let base = n / size;
        let mut blocks: Vec<_> = (0..size - 1).map(|rank| RowRange::new_length(rank * base, base)).collect();
        let last_start = (size - 1) * base;
        blocks.push(RowRange::new(last_start, n));
        blocks
    }

    /// the partition used for computation: every rank must own at least one row
    pub fn new(n: RowNum, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(MatmulError::Configuration("the process group is empty".to_string()));
        }
        if n == 0 {
            return Err(MatmulError::Configuration("matrix dimension must be at least 1".to_string()));
        }
        if n < size {
            return Err(MatmulError::Configuration(format!(
                "matrix dimension {n} is smaller than the group size {size}: ranks 0..{} would own no rows",
                size - 1
            )));
        }
        let partition = Self {
            n,
            size,
            blocks: Self::layout(n, size),
        };
        partition.sanity_check();
        Ok(partition)
    }

    pub fn block(&self, rank: Rank) -> RowRange {
        self.blocks[rank]
    }

    /// the number of rows of every rank
    pub fn row_counts(&self) -> Vec<RowNum> {
        self.blocks.iter().map(|block| block.len()).collect()
    }

    /// the flat element layout of the blocks in a row-major `n x n` buffer
    pub fn segment_layout(&self) -> SegmentLayout {
        let counts = self.blocks.iter().map(|block| block.len() * self.n).collect();
        SegmentLayout::from_counts(counts)
    }

    /// the rank owning a given row
    pub fn owner_of_row(&self, row_index: RowIndex) -> Option<Rank> {
        if row_index >= self.n {
            return None;
        }
        self.blocks.iter().position(|block| block.contains(row_index))
    }

    /// the blocks must be contiguous, in order, and cover `[0, n)` exactly once
    pub fn sanity_check(&self) {
        assert_eq!(self.blocks.len(), self.size, "one block per rank");
        let mut expected_start = 0;
        for (rank, block) in self.blocks.iter().enumerate() {
            block.sanity_check();
            assert_eq!(block.start(), expected_start, "gap or overlap before the block of rank {}", rank);
            expected_start = block.end();
        }
        assert_eq!(expected_start, self.n, "blocks do not cover all {} rows", self.n);
    }
}
