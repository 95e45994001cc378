//! Selection expansion.
//!
//! Turns the host's raw selection into the exact node set that is exported
//! and later renamed: containers are expanded to all of their descendants, the
//! union is deduplicated and excluded node types are dropped.

use crate::document::{descendants, DocumentHost, NodeId, NodeSnapshot, NodeType};
use crate::error::{LabelerError, Result};
use std::collections::HashSet;
use tracing::debug;

/// Expands and filters a raw selection.
pub struct Selector<'a> {
    host: &'a dyn DocumentHost,
    exclusions: &'a HashSet<NodeType>,
    top_level_only: bool,
}

impl<'a> Selector<'a> {
    pub fn new(host: &'a dyn DocumentHost, exclusions: &'a HashSet<NodeType>) -> Self {
        Self {
            host,
            exclusions,
            top_level_only: false,
        }
    }

    /// Skip expansion and return the raw selection as-is.
    pub fn top_level_only(mut self, enabled: bool) -> Self {
        self.top_level_only = enabled;
        self
    }

    /// Select from the host's current selection.
    pub fn select_current(&self) -> Result<Vec<NodeSnapshot>> {
        self.select(&self.host.selection())
    }

    /// Select from an explicit raw selection.
    ///
    /// Returns [`LabelerError::EmptySelection`] before doing any work when
    /// `raw` is empty. Ids the host no longer knows are skipped.
    pub fn select(&self, raw: &[NodeId]) -> Result<Vec<NodeSnapshot>> {
        if raw.is_empty() {
            return Err(LabelerError::EmptySelection);
        }

        let top_level: Vec<NodeSnapshot> = raw
            .iter()
            .filter_map(|id| {
                let node = self.host.node(id);
                if node.is_none() {
                    debug!("Selected node {} no longer exists, skipping", id);
                }
                node
            })
            .collect();

        if self.top_level_only {
            return Ok(top_level);
        }

        let mut candidates = top_level.clone();
        for node in &top_level {
            if node.node_type.is_container() {
                candidates.extend(
                    descendants(self.host, &node.id)
                        .iter()
                        .filter_map(|id| self.host.node(id)),
                );
            }
        }

        let mut seen = HashSet::with_capacity(candidates.len());
        let selected: Vec<NodeSnapshot> = candidates
            .into_iter()
            .filter(|node| seen.insert(node.id.clone()))
            .filter(|node| !self.exclusions.contains(&node.node_type))
            .collect();

        debug!(
            "Expanded {} selected nodes into {} candidates",
            raw.len(),
            selected.len()
        );
        Ok(selected)
    }
}
