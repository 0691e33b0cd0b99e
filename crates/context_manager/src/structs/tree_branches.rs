use std::collections::HashSet;

use chat_core::Message;

use crate::error::TreeError;
use crate::structs::branch::BranchInfo;
use crate::structs::tree::ConversationTree;

impl ConversationTree {
    /// Selected child index for `parent_id`, clamped into range.
    pub fn selected_index(&self, parent_id: &str) -> usize {
        let total = self.get(parent_id).map_or(0, |m| m.children_ids.len());
        let index = self.branch_state.get(parent_id).copied().unwrap_or(0);
        if total == 0 {
            return 0;
        }
        if index >= total {
            tracing::warn!(
                parent_id = %parent_id,
                index,
                total,
                "ConversationTree: branch index out of range, clamping"
            );
            return total - 1;
        }
        index
    }

    fn selected_child(&self, parent_id: &str) -> Option<&str> {
        let parent = self.get(parent_id)?;
        parent
            .children_ids
            .get(self.selected_index(parent_id))
            .map(String::as_str)
            .filter(|child| self.contains(child))
    }

    /// Follow the selected child from `message_id` until a message without
    /// children is reached.
    pub fn drill_to_leaf(&self, message_id: &str) -> String {
        self.descend(message_id)
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_else(|| message_id.to_string())
    }

    /// `from` and every selected descendant below it.
    fn descend(&self, from: &str) -> Vec<&Message> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut next = self.get(from);
        while let Some(message) = next {
            if !visited.insert(message.id.as_str()) {
                tracing::warn!(message_id = %message.id, "ConversationTree: cycle while descending");
                break;
            }
            path.push(message);
            next = self.selected_child(&message.id).and_then(|id| self.get(id));
        }
        path
    }

    /// Ids from the root down to `id` following `parent_id` links.
    fn ancestry(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = self.get(id);
        while let Some(message) = next {
            if !visited.insert(message.id.as_str()) {
                tracing::warn!(message_id = %message.id, "ConversationTree: cycle in parent links");
                break;
            }
            chain.push(message.id.as_str());
            next = match message.parent_id.as_deref() {
                Some(parent_id) => {
                    let parent = self.get(parent_id);
                    if parent.is_none() {
                        tracing::warn!(
                            message_id = %message.id,
                            parent_id = %parent_id,
                            "ConversationTree: parent not found, treating message as root"
                        );
                    }
                    parent
                }
                None => None,
            };
        }
        chain.reverse();
        chain
    }

    /// Messages from the root down to `id` along raw parent links, ignoring
    /// branch selection. This is the history a request for `id` is built from.
    pub fn lineage(&self, id: &str) -> Vec<&Message> {
        self.ancestry(id)
            .into_iter()
            .filter_map(|ancestor| self.get(ancestor))
            .collect()
    }

    /// Tip used when no current id is known: leaf of the first root.
    fn default_tip(&self) -> Option<String> {
        let root = self.messages().find(|m| m.parent_id.is_none())?;
        Some(self.drill_to_leaf(&root.id))
    }

    /// The linear transcript ending at `current_id` (or the tree's own
    /// current id).
    ///
    /// The raw parent chain only tells where to start; wherever the branch
    /// state selects a different child than the chain went through, the path
    /// follows the selection down to its leaf instead.
    pub fn active_path(&self, current_id: Option<&str>) -> Vec<&Message> {
        let start = match current_id
            .or(self.current_id.as_deref())
            .filter(|id| self.contains(id))
        {
            Some(id) => id.to_string(),
            None => match self.default_tip() {
                Some(id) => id,
                None => return Vec::new(),
            },
        };

        let chain = self.ancestry(&start);
        let mut path: Vec<&Message> = Vec::with_capacity(chain.len());
        let Some(root) = chain.first().and_then(|id| self.get(id)) else {
            return path;
        };
        path.push(root);

        for pair in chain.windows(2) {
            let (parent_id, raw_child) = (pair[0], pair[1]);
            match self.selected_child(parent_id) {
                Some(selected) if selected == raw_child => {
                    if let Some(child) = self.get(raw_child) {
                        path.push(child);
                    }
                }
                Some(selected) => {
                    tracing::debug!(
                        parent_id = %parent_id,
                        selected = %selected,
                        raw_child = %raw_child,
                        "ConversationTree: branch selection diverges from current chain"
                    );
                    path.extend(self.descend(selected));
                    return path;
                }
                None => break,
            }
        }
        path
    }

    /// Select child `index` of `parent_id`. Out-of-range indices are clamped;
    /// sibling branches are never removed.
    pub fn switch_branch(&mut self, parent_id: &str, index: usize) -> Result<usize, TreeError> {
        let total = self
            .get(parent_id)
            .ok_or_else(|| TreeError::MessageNotFound(parent_id.to_string()))?
            .children_ids
            .len();
        if total == 0 {
            tracing::warn!(parent_id = %parent_id, "ConversationTree: switch_branch on message without children");
            return Ok(0);
        }

        let clamped = index.min(total - 1);
        if clamped != index {
            tracing::warn!(
                parent_id = %parent_id,
                requested = index,
                clamped,
                "ConversationTree: branch index out of range, clamping"
            );
        }
        self.branch_state.insert(parent_id.to_string(), clamped);

        tracing::info!(
            parent_id = %parent_id,
            index = clamped,
            total_branches = total,
            "ConversationTree: switched branch"
        );
        Ok(clamped)
    }

    pub fn branch_info(&self, parent_id: &str) -> Option<BranchInfo> {
        let parent = self.get(parent_id)?;
        Some(BranchInfo {
            current_index: self.selected_index(parent_id),
            total_branches: parent.children_ids.len(),
        })
    }

    /// Branch points along the active path, for rendering switchers.
    pub fn active_branch_points(&self) -> Vec<(String, BranchInfo)> {
        self.active_path(None)
            .into_iter()
            .filter_map(|m| {
                self.branch_info(&m.id)
                    .filter(BranchInfo::is_branched)
                    .map(|info| (m.id.clone(), info))
            })
            .collect()
    }
}
