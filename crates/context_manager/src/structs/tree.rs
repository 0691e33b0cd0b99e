//! ConversationTree - arena of messages linked by id

use std::collections::{HashMap, HashSet};

use chat_core::{Message, Role};

use crate::error::TreeError;

/// All messages of one conversation plus the branch selection state.
///
/// Messages live in a map keyed by id; `parent_id`/`children_ids` are plain
/// id references. The tree is the only owner and the only writer of the map.
#[derive(Debug, Clone, Default)]
pub struct ConversationTree {
    pub(crate) messages: HashMap<String, Message>,
    /// Insertion order, used for backward scans and stable iteration.
    pub(crate) order: Vec<String>,
    /// parent id -> selected child index (absent means 0).
    pub(crate) branch_state: HashMap<String, usize>,
    pub(crate) current_id: Option<String>,
}

impl ConversationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tree from persisted messages.
    ///
    /// Broken links are repaired, duplicate user messages merged, and the
    /// branch state is seeded so that `current_id` (or, failing that, the
    /// most recent message) is the visible tip.
    pub fn from_messages(messages: Vec<Message>, current_id: Option<String>) -> Self {
        let mut tree = Self::new();
        let flat = messages
            .iter()
            .all(|m| m.parent_id.is_none() && m.children_ids.is_empty());

        for message in messages {
            let message = message.normalized();
            let id = message.id.clone();
            if tree.messages.insert(id.clone(), message).is_some() {
                tracing::warn!(message_id = %id, "ConversationTree: duplicate id in batch, later copy wins");
            } else {
                tree.order.push(id);
            }
        }

        if flat && tree.len() > 1 {
            tree.chain_flat_history();
        }
        tree.repair_links();
        tree.dedupe_user_messages();

        let tip = match current_id {
            Some(id) if tree.contains(&id) => Some(id),
            Some(id) => {
                tracing::warn!(current_id = %id, "ConversationTree: persisted current id not found, using latest message");
                tree.order.last().cloned()
            }
            None => tree.order.last().cloned(),
        };
        if let Some(tip) = tip {
            tree.select_path(&tip);
        }

        tracing::info!(
            message_count = tree.len(),
            current_id = ?tree.current_id,
            "ConversationTree: loaded from messages"
        );
        tree
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// All messages in insertion order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.order.iter().filter_map(|id| self.messages.get(id))
    }

    /// Owned snapshot in insertion order, as handed to persistence.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages().cloned().collect()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn branch_state(&self) -> &HashMap<String, usize> {
        &self.branch_state
    }

    /// Make `id` the tip and select every branch on the way down to it.
    pub fn set_current(&mut self, id: &str) -> Result<(), TreeError> {
        if !self.contains(id) {
            return Err(TreeError::MessageNotFound(id.to_string()));
        }
        self.select_path(id);
        Ok(())
    }

    pub(crate) fn select_path(&mut self, id: &str) {
        let mut child_id = id.to_string();
        let mut visited = HashSet::new();
        while visited.insert(child_id.clone()) {
            let Some(parent_id) = self.messages.get(&child_id).and_then(|m| m.parent_id.clone())
            else {
                break;
            };
            let Some(parent) = self.messages.get(&parent_id) else {
                break;
            };
            if let Some(index) = parent.children_ids.iter().position(|c| *c == child_id) {
                self.branch_state.insert(parent_id.clone(), index);
            }
            child_id = parent_id;
        }
        self.current_id = Some(id.to_string());
    }

    /// Upsert a message by id and keep the parent/child links bidirectional.
    ///
    /// A replacement keeps the children already known for that id; children
    /// named only by the incoming value are appended after them.
    pub fn add_or_replace(&mut self, message: Message) {
        let mut message = message.normalized();
        let id = message.id.clone();

        if message.parent_id.as_deref() == Some(id.as_str()) {
            tracing::warn!(message_id = %id, "ConversationTree: message names itself as parent, treating as root");
            message.parent_id = None;
        }

        let previous = self
            .messages
            .get(&id)
            .map(|existing| (existing.children_ids.clone(), existing.parent_id.clone()));
        let is_new = previous.is_none();

        if let Some((mut children, old_parent)) = previous {
            for child in &message.children_ids {
                if !children.contains(child) {
                    children.push(child.clone());
                }
            }
            message.children_ids = children;

            if old_parent != message.parent_id {
                if let Some(old_parent) = old_parent {
                    self.remove_child(&old_parent, &id, None);
                }
            }
        }

        let parent_id = message.parent_id.clone();
        self.messages.insert(id.clone(), message);
        if is_new {
            self.order.push(id.clone());
        }

        if let Some(parent_id) = parent_id {
            match self.messages.get_mut(&parent_id) {
                Some(parent) => {
                    if !parent.children_ids.contains(&id) {
                        parent.children_ids.push(id.clone());
                    }
                }
                None => tracing::debug!(
                    message_id = %id,
                    parent_id = %parent_id,
                    "ConversationTree: parent not present yet"
                ),
            }
        }

        if is_new {
            self.adopt_orphans(&id);
        }
    }

    /// Parent a new message would get by convention: an assistant answers
    /// the latest user message, a user or tool message follows the latest
    /// assistant message, system messages are roots.
    pub fn resolve_parent<'a, I>(role: Role, existing: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a Message>,
        I::IntoIter: DoubleEndedIterator,
    {
        let wanted = match role {
            Role::Assistant => Role::User,
            Role::User | Role::Tool => Role::Assistant,
            Role::System => return None,
        };
        existing
            .into_iter()
            .rev()
            .find(|m| m.role == wanted)
            .map(|m| m.id.clone())
    }

    /// Parent of `id`, resolving and linking one by convention when the
    /// message has none.
    pub fn ensure_parent(&mut self, id: &str) -> Result<String, TreeError> {
        let message = self
            .get(id)
            .ok_or_else(|| TreeError::MessageNotFound(id.to_string()))?;
        if let Some(parent_id) = message.parent_id.as_deref() {
            if self.contains(parent_id) {
                return Ok(parent_id.to_string());
            }
        }

        let position = self
            .order
            .iter()
            .position(|o| o == id)
            .unwrap_or(self.order.len());
        let earlier: Vec<&Message> = self.order[..position]
            .iter()
            .filter_map(|o| self.messages.get(o))
            .collect();
        let parent_id = Self::resolve_parent(message.role, earlier)
            .ok_or_else(|| TreeError::NoParent(id.to_string()))?;

        let mut updated = message.clone();
        updated.parent_id = Some(parent_id.clone());
        tracing::info!(message_id = %id, parent_id = %parent_id, "ConversationTree: resolved missing parent");
        self.add_or_replace(updated);
        Ok(parent_id)
    }

    /// Unlink `child_id` from its parent, keeping the parent's selection on
    /// the same sibling (or on `replacement` if the selected one goes away).
    pub(crate) fn remove_child(&mut self, parent_id: &str, child_id: &str, replacement: Option<&str>) {
        let Some(parent) = self.messages.get_mut(parent_id) else {
            return;
        };
        let Some(position) = parent.children_ids.iter().position(|c| c == child_id) else {
            return;
        };
        let selected = self.branch_state.get(parent_id).copied().unwrap_or(0);
        parent.children_ids.remove(position);

        let total = parent.children_ids.len();
        if total == 0 {
            self.branch_state.remove(parent_id);
            return;
        }
        let index = if selected == position {
            replacement
                .and_then(|r| parent.children_ids.iter().position(|c| c == r))
                .unwrap_or(position)
        } else if selected > position {
            selected - 1
        } else {
            selected
        };
        self.branch_state
            .insert(parent_id.to_string(), index.min(total - 1));
    }

    fn adopt_orphans(&mut self, id: &str) {
        let orphans: Vec<String> = self
            .order
            .iter()
            .filter(|o| {
                self.messages
                    .get(*o)
                    .is_some_and(|m| m.parent_id.as_deref() == Some(id))
            })
            .cloned()
            .collect();
        if let Some(message) = self.messages.get_mut(id) {
            for orphan in orphans {
                if !message.children_ids.contains(&orphan) {
                    message.children_ids.push(orphan);
                }
            }
        }
    }

    /// A history persisted without any links: chain it by role convention.
    fn chain_flat_history(&mut self) {
        for i in 1..self.order.len() {
            let id = self.order[i].clone();
            let Some(role) = self.messages.get(&id).map(|m| m.role) else {
                continue;
            };
            let earlier: Vec<&Message> = self.order[..i]
                .iter()
                .filter_map(|o| self.messages.get(o))
                .collect();
            let parent_id = Self::resolve_parent(role, earlier);
            if let Some(message) = self.messages.get_mut(&id) {
                message.parent_id = parent_id;
            }
        }
    }

    /// Drop dangling parent references and stale child entries, then add
    /// every missing child link.
    fn repair_links(&mut self) {
        for id in &self.order {
            let dangling = self.messages.get(id).and_then(|m| {
                m.parent_id
                    .as_ref()
                    .filter(|p| *p == id || !self.messages.contains_key(*p))
                    .cloned()
            });
            if let Some(parent_id) = dangling {
                tracing::warn!(
                    message_id = %id,
                    parent_id = %parent_id,
                    "ConversationTree: parent not found, treating message as root"
                );
                if let Some(message) = self.messages.get_mut(id) {
                    message.parent_id = None;
                }
            }
        }

        for id in &self.order {
            let Some(message) = self.messages.get(id) else {
                continue;
            };
            let mut seen = HashSet::new();
            let kept: Vec<String> = message
                .children_ids
                .iter()
                .filter(|child| {
                    seen.insert((*child).clone())
                        && self
                            .messages
                            .get(*child)
                            .is_some_and(|c| c.parent_id.as_deref() == Some(id.as_str()))
                })
                .cloned()
                .collect();
            if kept.len() != message.children_ids.len() {
                tracing::warn!(
                    message_id = %id,
                    dropped = message.children_ids.len() - kept.len(),
                    "ConversationTree: dropped stale child references"
                );
                if let Some(message) = self.messages.get_mut(id) {
                    message.children_ids = kept;
                }
            }
        }

        for id in self.order.clone() {
            let parent_id = self.messages.get(&id).and_then(|m| m.parent_id.clone());
            if let Some(parent) = parent_id.and_then(|p| self.messages.get_mut(&p)) {
                if !parent.children_ids.contains(&id) {
                    parent.children_ids.push(id);
                }
            }
        }
    }
}
