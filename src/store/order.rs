//! Write Order Module
//!
//! Tracks the order keys were written in, so the size limit can evict the
//! oldest entries first. Every operation is logarithmic in the number of
//! tracked keys.

use std::collections::{BTreeMap, HashMap};

// == Write Order ==
/// Keys ranked by a monotonically increasing write sequence.
#[derive(Debug, Default)]
pub struct WriteOrder {
    by_sequence: BTreeMap<u64, String>,
    sequence_of: HashMap<String, u64>,
    next: u64,
}

impl WriteOrder {
    /// Rebuilds the order from keys listed oldest first.
    pub fn from_oldest_first<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut order = Self::default();
        for key in keys {
            order.touch(&key);
        }
        order
    }

    /// Marks a key as just written.
    pub fn touch(&mut self, key: &str) {
        self.remove(key);
        let sequence = self.next;
        self.next += 1;
        self.by_sequence.insert(sequence, key.to_string());
        self.sequence_of.insert(key.to_string(), sequence);
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(sequence) = self.sequence_of.remove(key) {
            self.by_sequence.remove(&sequence);
        }
    }

    /// Returns and removes the oldest written key.
    pub fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_sequence.pop_first()?;
        self.sequence_of.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.by_sequence.clear();
        self.sequence_of.clear();
    }
}
