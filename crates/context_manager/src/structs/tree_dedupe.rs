use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use chat_core::{Message, Role};

use crate::structs::tree::ConversationTree;

impl ConversationTree {
    /// Merge user messages that share a parent and identical content.
    ///
    /// The keeper is the member with the most children; ties go to the most
    /// recent `created_at`, then to the earliest inserted. Children of the
    /// removed members move to the keeper. Returns `(removed, keeper)` pairs.
    /// Running it twice changes nothing the second time.
    pub fn dedupe_user_messages(&mut self) -> Vec<(String, String)> {
        let mut merged = Vec::new();
        loop {
            let round = self.dedupe_pass();
            if round.is_empty() {
                break;
            }
            merged.extend(round);
        }

        if !merged.is_empty() {
            tracing::info!(
                removed = merged.len(),
                "ConversationTree: merged duplicate user messages"
            );
            // Keep the visible tip where it was.
            if let Some(current) = self.current_id.clone() {
                self.select_path(&current);
            }
        }
        merged
    }

    /// Upsert an externally supplied batch, then reconcile duplicates.
    pub fn merge_messages(&mut self, batch: Vec<Message>) -> Vec<(String, String)> {
        let count = batch.len();
        for message in batch {
            self.add_or_replace(message);
        }
        let merged = self.dedupe_user_messages();
        if self.current_id.is_none() {
            if let Some(last) = self.order.last().cloned() {
                self.select_path(&last);
            }
        }
        tracing::debug!(
            batch = count,
            merged = merged.len(),
            "ConversationTree: merged message batch"
        );
        merged
    }

    fn dedupe_pass(&mut self) -> Vec<(String, String)> {
        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut index: HashMap<(Option<&str>, &str), usize> = HashMap::new();
        for id in &self.order {
            let Some(message) = self.messages.get(id) else {
                continue;
            };
            if message.role != Role::User {
                continue;
            }
            let key = (message.parent_id.as_deref(), message.content.as_str());
            match index.get(&key) {
                Some(&group) => groups[group].push(id.clone()),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![id.clone()]);
                }
            }
        }
        drop(index);

        let mut merged = Vec::new();
        for members in groups.into_iter().filter(|g| g.len() > 1) {
            let Some(keeper) = self.pick_keeper(&members) else {
                continue;
            };
            for removed in members.iter().filter(|id| **id != keeper) {
                self.merge_into(removed, &keeper);
                merged.push((removed.clone(), keeper.clone()));
            }
        }
        merged
    }

    fn pick_keeper(&self, members: &[String]) -> Option<String> {
        members
            .iter()
            .enumerate()
            .filter_map(|(position, id)| self.messages.get(id).map(|m| (position, m)))
            .max_by(|(pa, a), (pb, b)| keeper_order(a, b).then(Reverse(pa).cmp(&Reverse(pb))))
            .map(|(_, m)| m.id.clone())
    }

    fn merge_into(&mut self, removed_id: &str, keeper_id: &str) {
        let Some(removed) = self.messages.remove(removed_id) else {
            return;
        };
        self.order.retain(|id| id != removed_id);

        if let Some(parent_id) = removed.parent_id.as_deref() {
            self.remove_child(parent_id, removed_id, Some(keeper_id));
        }

        let mut orphans = removed.children_ids.clone();
        for id in &self.order {
            let points_here = self
                .messages
                .get(id)
                .is_some_and(|m| m.parent_id.as_deref() == Some(removed_id));
            if points_here && !orphans.contains(id) {
                orphans.push(id.clone());
            }
        }

        for child_id in &orphans {
            let Some(child) = self.messages.get_mut(child_id) else {
                continue;
            };
            child.parent_id = Some(keeper_id.to_string());
            if let Some(keeper) = self.messages.get_mut(keeper_id) {
                if !keeper.children_ids.contains(child_id) {
                    keeper.children_ids.push(child_id.clone());
                }
            }
        }

        self.branch_state.remove(removed_id);
        if self.current_id.as_deref() == Some(removed_id) {
            self.current_id = Some(keeper_id.to_string());
        }

        tracing::debug!(
            removed_id = %removed_id,
            keeper_id = %keeper_id,
            moved_children = orphans.len(),
            "ConversationTree: merged duplicate user message"
        );
    }
}

/// More children first, then the more recent message.
fn keeper_order(a: &Message, b: &Message) -> Ordering {
    a.children_ids
        .len()
        .cmp(&b.children_ids.len())
        .then(a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(id: &str, content: &str, parent: Option<&str>) -> Message {
        Message::user(content)
            .with_id(id)
            .with_parent(parent.map(str::to_string))
    }

    #[test]
    fn duplicate_with_children_survives() {
        let mut tree = ConversationTree::new();
        tree.add_or_replace(Message::assistant(None).with_id("root"));
        tree.add_or_replace(user("p1", "ping", Some("root")));
        tree.add_or_replace(user("p2", "ping", Some("root")));
        tree.add_or_replace(
            Message::assistant(None)
                .with_id("a")
                .with_parent(Some("p2".to_string())),
        );

        let merged = tree.dedupe_user_messages();
        assert_eq!(merged, vec![("p1".to_string(), "p2".to_string())]);
        assert!(!tree.contains("p1"));
        assert_eq!(tree.get("p2").unwrap().children_ids, vec!["a"]);
        assert_eq!(tree.get("root").unwrap().children_ids, vec!["p2"]);
    }

    #[test]
    fn tie_goes_to_most_recent() {
        let mut tree = ConversationTree::new();
        let mut older = user("old", "ping", None);
        older.created_at = older.created_at - Duration::seconds(30);
        tree.add_or_replace(older);
        tree.add_or_replace(user("new", "ping", None));

        tree.dedupe_user_messages();
        assert!(tree.contains("new"));
        assert!(!tree.contains("old"));
    }

    #[test]
    fn children_of_removed_move_to_keeper() {
        let mut tree = ConversationTree::new();
        tree.add_or_replace(user("k", "ping", None));
        tree.add_or_replace(user("d", "ping", None));
        for (id, parent) in [("a1", "k"), ("a2", "k"), ("a3", "d")] {
            tree.add_or_replace(
                Message::assistant(None)
                    .with_id(id)
                    .with_parent(Some(parent.to_string())),
            );
        }
        tree.set_current("a3").unwrap();

        tree.dedupe_user_messages();
        let keeper = tree.get("k").unwrap();
        assert_eq!(keeper.children_ids, vec!["a1", "a2", "a3"]);
        assert_eq!(tree.get("a3").unwrap().parent_id.as_deref(), Some("k"));
        assert_eq!(tree.current_id(), Some("a3"));
        assert_eq!(tree.selected_index("k"), 2);
    }

    #[test]
    fn different_parents_are_not_duplicates() {
        let mut tree = ConversationTree::new();
        tree.add_or_replace(Message::assistant(None).with_id("x"));
        tree.add_or_replace(Message::assistant(None).with_id("y"));
        tree.add_or_replace(user("u1", "ping", Some("x")));
        tree.add_or_replace(user("u2", "ping", Some("y")));
        assert!(tree.dedupe_user_messages().is_empty());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn keeper_order_prefers_children() {
        let mut with_child = user("a", "ping", None);
        with_child.children_ids.push("c".to_string());
        let without = user("b", "ping", None);
        assert_eq!(keeper_order(&with_child, &without), Ordering::Greater);
    }
}
