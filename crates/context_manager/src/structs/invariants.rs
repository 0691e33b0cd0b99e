use std::collections::HashSet;

use chat_core::Role;
use thiserror::Error;

use crate::structs::tree::ConversationTree;

/// A structural rule the tree is expected to hold after every mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{child_id} names {parent_id} as parent but is not among its children")]
    ChildNotLinked { parent_id: String, child_id: String },

    #[error("{parent_id} lists {child_id} as a child, but {child_id} has another parent")]
    ForeignChild { parent_id: String, child_id: String },

    #[error("{parent_id} lists child {child_id} more than once")]
    RepeatedChild { parent_id: String, child_id: String },

    #[error("assistant message {message_id} has no model")]
    MissingModel { message_id: String },

    #[error("duplicate user message {content:?} under parent {parent_id:?}")]
    DuplicateUserSibling {
        parent_id: Option<String>,
        content: String,
    },

    #[error("branch index {index} out of range for {parent_id} ({total} children)")]
    BranchIndexOutOfRange {
        parent_id: String,
        index: usize,
        total: usize,
    },
}

impl ConversationTree {
    /// Every violated invariant, in message order. Empty means consistent.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let mut user_keys = HashSet::new();

        for message in self.messages() {
            if let Some(parent) = message.parent_id.as_deref().and_then(|p| self.get(p)) {
                if !parent.children_ids.contains(&message.id) {
                    violations.push(InvariantViolation::ChildNotLinked {
                        parent_id: parent.id.clone(),
                        child_id: message.id.clone(),
                    });
                }
            }

            let mut seen = HashSet::new();
            for child_id in &message.children_ids {
                if !seen.insert(child_id) {
                    violations.push(InvariantViolation::RepeatedChild {
                        parent_id: message.id.clone(),
                        child_id: child_id.clone(),
                    });
                }
                if let Some(child) = self.get(child_id) {
                    if child.parent_id.as_deref() != Some(message.id.as_str()) {
                        violations.push(InvariantViolation::ForeignChild {
                            parent_id: message.id.clone(),
                            child_id: child_id.clone(),
                        });
                    }
                }
            }

            if message.role == Role::Assistant && message.model.is_none() {
                violations.push(InvariantViolation::MissingModel {
                    message_id: message.id.clone(),
                });
            }

            if message.role == Role::User
                && !user_keys.insert((message.parent_id.as_deref(), message.content.as_str()))
            {
                violations.push(InvariantViolation::DuplicateUserSibling {
                    parent_id: message.parent_id.clone(),
                    content: message.content.clone(),
                });
            }
        }

        for (parent_id, &index) in &self.branch_state {
            let total = self.get(parent_id).map_or(0, |m| m.children_ids.len());
            if index >= total {
                violations.push(InvariantViolation::BranchIndexOutOfRange {
                    parent_id: parent_id.clone(),
                    index,
                    total,
                });
            }
        }

        violations
    }

    pub fn is_consistent(&self) -> bool {
        self.check_invariants().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::Message;

    #[test]
    fn reports_broken_links() {
        let mut tree = ConversationTree::new();
        tree.add_or_replace(Message::user("Hi").with_id("u1"));
        tree.add_or_replace(
            Message::assistant(None)
                .with_id("a1")
                .with_parent(Some("u1".to_string())),
        );
        assert!(tree.is_consistent());

        // Bypass add_or_replace to corrupt the links.
        if let Some(user) = tree.messages.get_mut("u1") {
            user.children_ids.clear();
        }
        assert_eq!(
            tree.check_invariants(),
            vec![InvariantViolation::ChildNotLinked {
                parent_id: "u1".to_string(),
                child_id: "a1".to_string(),
            }]
        );
    }

    #[test]
    fn reports_duplicate_users_and_bad_index() {
        let mut tree = ConversationTree::new();
        tree.add_or_replace(Message::user("ping").with_id("p1"));
        tree.add_or_replace(Message::user("ping").with_id("p2"));
        tree.branch_state.insert("p1".to_string(), 3);

        let violations = tree.check_invariants();
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            violations[0],
            InvariantViolation::DuplicateUserSibling { .. }
        ));
        assert!(matches!(
            violations[1],
            InvariantViolation::BranchIndexOutOfRange { index: 3, total: 0, .. }
        ));
    }
}
