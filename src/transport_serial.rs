//! Serial Transport
//!
//! A group with a single member: the coordinator is the whole group, so every collective is a local copy.
//!

use super::error::{MatmulError, Result};
use super::transport::*;
use super::util::*;

#[derive(Debug, Clone, Default)]
pub struct SerialTransport {}

impl SerialTransport {
    pub fn new() -> Self {
        Self {}
    }
}

impl CollectiveTransport for SerialTransport {
    fn group(&self) -> ProcessGroup {
        ProcessGroup::solo()
    }

    fn broadcast(&self, _buffer: &mut Vec<f64>, root: Rank) -> Result<()> {
        contract::check_root(&self.group(), root)
    }

    fn scatter_varying(&self, source: Option<&[f64]>, layout: &SegmentLayout, root: Rank) -> Result<Vec<f64>> {
        match contract::check_scatter(&self.group(), source, layout, root)? {
            Some(source) => Ok(source[layout.segment(0)].to_vec()),
            None => Err(MatmulError::Transport("the only rank must be the scatter root".to_string())),
        }
    }

    fn gather_varying(&self, local: &[f64], layout: &SegmentLayout, root: Rank) -> Result<Option<Vec<f64>>> {
        contract::check_gather(&self.group(), local, layout, root)?;
        Ok(Some(local.to_vec()))
    }
}
