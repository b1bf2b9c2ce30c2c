use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::Member;

/// Membership registry — per-topic set of member records keyed by label.
///
/// Adds are idempotent by (topic, label): a repeat add overwrites in
/// place. Unknown topics yield empty results, never errors.
#[derive(Default)]
pub struct GroupStore {
    topics: RwLock<HashMap<String, HashMap<String, Member>>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a member record.
    pub fn add_or_update(&self, topic: &str, member: Member) {
        let mut topics = self.topics.write().expect("group store lock poisoned");
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(member.label.clone(), member);
    }

    /// Remove one member record. A vanished topic entry is dropped.
    pub fn remove(&self, topic: &str, label: &str) {
        let mut topics = self.topics.write().expect("group store lock poisoned");
        if let Some(members) = topics.get_mut(topic) {
            members.remove(label);
            if members.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Drop the whole topic entry.
    pub fn delete_topic(&self, topic: &str) {
        self.topics
            .write()
            .expect("group store lock poisoned")
            .remove(topic);
    }

    /// One member record, if present.
    pub fn member(&self, topic: &str, label: &str) -> Option<Member> {
        self.topics
            .read()
            .expect("group store lock poisoned")
            .get(topic)
            .and_then(|members| members.get(label))
            .cloned()
    }

    /// Snapshot of a topic's member set.
    pub fn members(&self, topic: &str) -> Vec<Member> {
        self.topics
            .read()
            .expect("group store lock poisoned")
            .get(topic)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether this node holds any membership state for the topic.
    pub fn is_member(&self, topic: &str) -> bool {
        self.topics
            .read()
            .expect("group store lock poisoned")
            .get(topic)
            .is_some_and(|members| !members.is_empty())
    }

    /// Whether a label appears in any topic's member set. Used to decide
    /// when a departing peer's transport keys can be torn down.
    pub fn member_of_any(&self, label: &str) -> bool {
        self.topics
            .read()
            .expect("group store lock poisoned")
            .values()
            .any(|members| members.contains_key(label))
    }
}
