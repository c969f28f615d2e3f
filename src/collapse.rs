use crate::models::{FolderRow, LeafSummary};
use crate::tree::collect_descendants_only;
use std::collections::{BTreeSet, HashSet};

/// Folder ids whose children and leaves are hidden in the tree view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseTracker {
    collapsed: BTreeSet<i64>,
    known: BTreeSet<i64>,
}

impl CollapseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every flag and collapses exactly the folders that have content.
    pub fn reset(&mut self, rows: &[FolderRow], leaves: &[LeafSummary]) {
        self.collapsed = default_collapsed(rows, leaves);
        self.known = rows.iter().map(|row| row.id).collect();
    }

    /// Keeps current flags and forgets vanished folders. Only folders that
    /// were not known before get the default flag.
    pub fn refresh(&mut self, rows: &[FolderRow], leaves: &[LeafSummary]) {
        let present: BTreeSet<i64> = rows.iter().map(|row| row.id).collect();
        self.collapsed.retain(|id| present.contains(id));
        let defaults = default_collapsed(rows, leaves);
        self.collapsed
            .extend(defaults.into_iter().filter(|id| !self.known.contains(id)));
        self.known = present;
    }

    /// Opening only touches `id`; closing also closes every descendant.
    /// Ids missing from `rows` are ignored and report expanded.
    pub fn toggle(&mut self, id: i64, rows: &[FolderRow]) -> bool {
        if !rows.iter().any(|row| row.id == id) {
            return false;
        }
        if self.collapsed.remove(&id) {
            return false;
        }
        self.collapsed.insert(id);
        self.collapsed.extend(collect_descendants_only(rows, id));
        true
    }

    pub fn is_collapsed(&self, id: i64) -> bool {
        self.collapsed.contains(&id)
    }

    pub fn expand_all(&mut self) {
        self.collapsed.clear();
    }

    pub fn collapsed_ids(&self) -> Vec<i64> {
        self.collapsed.iter().copied().collect()
    }
}

fn default_collapsed(rows: &[FolderRow], leaves: &[LeafSummary]) -> BTreeSet<i64> {
    let mut with_content: HashSet<i64> = leaves.iter().filter_map(|leaf| leaf.folder_id).collect();
    with_content.extend(rows.iter().filter_map(|row| row.parent_id));
    rows.iter()
        .map(|row| row.id)
        .filter(|id| with_content.contains(id))
        .collect()
}
