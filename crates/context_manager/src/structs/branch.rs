use serde::{Deserialize, Serialize};

/// Which child of a parent is displayed, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub current_index: usize,
    pub total_branches: usize,
}

impl BranchInfo {
    /// More than one child: the branch switcher is shown.
    pub fn is_branched(&self) -> bool {
        self.total_branches > 1
    }

    pub fn has_previous(&self) -> bool {
        self.current_index > 0
    }

    pub fn has_next(&self) -> bool {
        self.current_index + 1 < self.total_branches
    }
}
