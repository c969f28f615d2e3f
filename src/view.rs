use crate::collapse::CollapseTracker;
use crate::models::{FolderNode, FolderRow, LeafSummary};
use crate::tree::build_tree;

/// In-memory snapshot of one hierarchy: the flat rows, its leaves, the built
/// forest and which folders are collapsed.
#[derive(Debug, Clone, Default)]
pub struct FolderView {
    rows: Vec<FolderRow>,
    leaves: Vec<LeafSummary>,
    tree: Vec<FolderNode>,
    collapse: CollapseTracker,
}

impl FolderView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial load. Collapse flags are reset to their defaults.
    pub fn load(&mut self, rows: Vec<FolderRow>, leaves: Vec<LeafSummary>) {
        self.collapse.reset(&rows, &leaves);
        self.replace(rows, leaves);
    }

    /// Reload after a mutation. Existing collapse flags survive.
    pub fn refresh(&mut self, rows: Vec<FolderRow>, leaves: Vec<LeafSummary>) {
        self.collapse.refresh(&rows, &leaves);
        self.replace(rows, leaves);
    }

    fn replace(&mut self, rows: Vec<FolderRow>, leaves: Vec<LeafSummary>) {
        self.tree = build_tree(&rows, &leaves);
        self.rows = rows;
        self.leaves = leaves;
    }

    pub fn toggle(&mut self, id: i64) -> bool {
        self.collapse.toggle(id, &self.rows)
    }

    pub fn is_collapsed(&self, id: i64) -> bool {
        self.collapse.is_collapsed(id)
    }

    pub fn collapsed_ids(&self) -> Vec<i64> {
        self.collapse.collapsed_ids()
    }

    pub fn tree(&self) -> &[FolderNode] {
        &self.tree
    }

    pub fn rows(&self) -> &[FolderRow] {
        &self.rows
    }

    pub fn folder(&self, id: i64) -> Option<&FolderRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    /// Leaves with no folder, or whose folder no longer exists.
    pub fn root_leaves(&self) -> Vec<LeafSummary> {
        self.leaves
            .iter()
            .filter(|leaf| leaf.folder_id.map_or(true, |id| self.folder(id).is_none()))
            .cloned()
            .collect()
    }

    pub fn leaves_in(&self, folder_id: i64) -> Vec<LeafSummary> {
        self.leaves
            .iter()
            .filter(|leaf| leaf.folder_id == Some(folder_id))
            .cloned()
            .collect()
    }

    pub fn leaves(&self) -> &[LeafSummary] {
        &self.leaves
    }
}
