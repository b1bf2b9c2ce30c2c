/// Join-consistency validator.
///
/// With no central sequencer, the only admission control against a lying
/// or stale join acceptor is corroboration: every existing member reports
/// a digest of its own member view during the join handshake, and the
/// join fails unless all digests agree. Digests are order-independent —
/// the member set is canonicalized by label before hashing, so two peers
/// holding the same true set always agree regardless of arrival order.
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Member;

/// Order-independent SHA-256 digest over a member set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}...)", &hex::encode(self.0)[..12])
    }
}

/// Stores the current digest per topic; recomputed after every
/// membership-affecting event.
#[derive(Default)]
pub struct Validator {
    hashes: RwLock<HashMap<String, Checksum>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic digest of a member set: sort by label, hash the
    /// canonical serialization of each record.
    pub fn calculate(members: &[Member]) -> Checksum {
        let mut sorted: Vec<&Member> = members.iter().collect();
        sorted.sort_by(|a, b| a.label.cmp(&b.label));

        let mut hasher = Sha256::new();
        for member in sorted {
            let bytes = rmp_serde::to_vec(member).expect("member serialization");
            hasher.update(&bytes);
        }
        Checksum(hasher.finalize().into())
    }

    /// Recompute and store the topic's digest.
    pub fn update_hash(&self, topic: &str, members: &[Member]) {
        let checksum = Self::calculate(members);
        self.hashes
            .write()
            .expect("validator lock poisoned")
            .insert(topic.to_string(), checksum);
    }

    /// The currently stored digest, as returned to subscribing peers.
    pub fn hash(&self, topic: &str) -> Option<Checksum> {
        self.hashes
            .read()
            .expect("validator lock poisoned")
            .get(topic)
            .copied()
    }

    /// Drop the stored digest on topic teardown.
    pub fn remove(&self, topic: &str) {
        self.hashes
            .write()
            .expect("validator lock poisoned")
            .remove(topic);
    }

    /// Check digests reported by existing members during a join.
    ///
    /// Returns `(_, true)` only when every reported value is identical.
    /// Otherwise the labels diverging from the modal value are returned;
    /// when no value holds a strict plurality, every label is reported.
    pub fn verify(reported: &HashMap<String, Checksum>) -> (Vec<String>, bool) {
        if reported.len() < 2 {
            return (Vec::new(), true);
        }

        let mut counts: HashMap<Checksum, usize> = HashMap::new();
        for checksum in reported.values() {
            *counts.entry(*checksum).or_default() += 1;
        }
        if counts.len() == 1 {
            return (Vec::new(), true);
        }

        let max = counts.values().copied().max().unwrap_or(0);
        let modal: Vec<Checksum> = counts
            .iter()
            .filter(|(_, c)| **c == max)
            .map(|(k, _)| *k)
            .collect();

        let mut labels: Vec<String> = if modal.len() > 1 {
            // No consensus at all.
            reported.keys().cloned().collect()
        } else {
            reported
                .iter()
                .filter(|(_, c)| **c != modal[0])
                .map(|(label, _)| label.clone())
                .collect()
        };
        labels.sort();
        (labels, false)
    }
}
