use std::collections::HashMap;
use std::sync::RwLock;

/// Fan-out registry — per-topic map from subscriber label to the
/// end-to-end public key data messages for that subscriber are encrypted
/// with.
///
/// Only tracks peers the local node completed a subscribe handshake with;
/// an empty map for a topic means a send is a no-op, not an error.
#[derive(Default)]
pub struct SubStore {
    topics: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl SubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, topic: &str, label: &str, pub_key: Vec<u8>) {
        let mut topics = self.topics.write().expect("sub store lock poisoned");
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(label.to_string(), pub_key);
    }

    pub fn delete(&self, topic: &str, label: &str) {
        let mut topics = self.topics.write().expect("sub store lock poisoned");
        if let Some(subs) = topics.get_mut(topic) {
            subs.remove(label);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    pub fn delete_topic(&self, topic: &str) {
        self.topics
            .write()
            .expect("sub store lock poisoned")
            .remove(topic);
    }

    /// Snapshot of a topic's subscribers. Empty for unknown topics.
    pub fn query_by_topic(&self, topic: &str) -> HashMap<String, Vec<u8>> {
        self.topics
            .read()
            .expect("sub store lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }
}
