use thiserror::Error;

/// Precondition failures of explicit tree operations.
///
/// Structural problems found while reading the tree (dangling parents,
/// out-of-range branch indices) are recovered with safe defaults and
/// logged instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("message {0} is not an assistant message")]
    NotAssistant(String),

    #[error("message {0} already has replies and cannot be continued")]
    HasChildren(String),

    #[error("message {0} has no parent to branch from")]
    NoParent(String),
}
