//! Flood control cache
//!
//! Remembers which `(origin, type)` pairs this node has relayed and when.
//! A repeat arriving strictly inside the flood window is suppressed; a
//! repeat outside it evicts the stale entry and is forwarded again.
//!
//! The window is normally 90% of the periodic transmit interval, so each
//! origin's next scheduled reading is never mistaken for a duplicate of the
//! previous one.

use super::frame::{MsgType, NodeId};
use std::time::Duration;

/// One remembered relay decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    /// Origin of the relayed frame
    pub origin: NodeId,
    /// Type of the relayed frame
    pub msg_type: MsgType,
    /// Node time (ms) of the relay decision
    pub last_seen: u64,
}

/// Ordered, linearly scanned duplicate cache
///
/// Scan order is insertion order and the first matching entry decides.
/// Uniqueness per pair is expected but not enforced.
#[derive(Debug, Clone)]
pub struct DedupCache {
    entries: Vec<DedupEntry>,
    window_ms: u64,
}

impl DedupCache {
    /// Create a cache with the given flood window
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            window_ms: window.as_millis() as u64,
        }
    }

    /// Flood window in milliseconds
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Decide whether a frame from `origin` of `msg_type` should be relayed
    ///
    /// Does not insert; call [`DedupCache::record`] once the relay is
    /// committed. A stale match is removed here. A zero or negative age
    /// (clock went backwards) counts as stale.
    pub fn should_forward(&mut self, origin: NodeId, msg_type: MsgType, now: u64) -> bool {
        let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.origin == origin && e.msg_type == msg_type)
        else {
            return true;
        };

        let entry = self.entries[idx];
        match now.checked_sub(entry.last_seen) {
            Some(age) if age > 0 && age < self.window_ms => {
                tracing::trace!(%origin, %msg_type, age, "recent match");
                false
            }
            _ => {
                tracing::trace!(%origin, %msg_type, "stale match, evicting");
                self.entries.remove(idx);
                true
            }
        }
    }

    /// Remember a relay decision made at `now`
    pub fn record(&mut self, origin: NodeId, msg_type: MsgType, now: u64) {
        self.entries.push(DedupEntry {
            origin,
            msg_type,
            last_seen: now,
        });
    }

    /// Iterate entries in scan order
    pub fn iter(&self) -> impl Iterator<Item = &DedupEntry> {
        self.entries.iter()
    }

    /// Number of entries in cache
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u64 = 540_000;

    fn origin(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn cache() -> DedupCache {
        DedupCache::new(Duration::from_millis(W))
    }

    #[test]
    fn test_unknown_pair_forwards_without_insert() {
        let mut cache = cache();
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, 1000));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_window_boundary() {
        let mut cache = cache();
        cache.record(origin(5), MsgType::TEMPERATURE, 1000);

        // Inside the window: suppressed, entry untouched
        assert!(!cache.should_forward(origin(5), MsgType::TEMPERATURE, 1000 + W - 1));
        assert_eq!(cache.len(), 1);

        // Past the window: forwarded, stale entry gone
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, 1000 + W + 1));
        assert!(cache.is_empty());

        cache.record(origin(5), MsgType::TEMPERATURE, 1000 + W + 1);
        assert_eq!(cache.iter().next().unwrap().last_seen, 1000 + W + 1);
        assert!(!cache.should_forward(origin(5), MsgType::TEMPERATURE, 1000 + W + 2));
    }

    #[test]
    fn test_exact_window_is_stale() {
        let mut cache = cache();
        cache.record(origin(5), MsgType::TEMPERATURE, 0);
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, W));
    }

    #[test]
    fn test_zero_and_negative_age_are_stale() {
        let mut cache = cache();
        cache.record(origin(5), MsgType::TEMPERATURE, 5000);
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, 5000));

        cache.record(origin(5), MsgType::TEMPERATURE, 5000);
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, 4000));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pairs_are_independent() {
        let mut cache = cache();
        cache.record(origin(5), MsgType::TEMPERATURE, 100);
        assert!(cache.should_forward(origin(5), MsgType::HUMIDITY, 200));
        assert!(cache.should_forward(origin(6), MsgType::TEMPERATURE, 200));
        assert!(!cache.should_forward(origin(5), MsgType::TEMPERATURE, 200));
    }

    #[test]
    fn test_first_match_wins() {
        let mut cache = cache();
        cache.record(origin(5), MsgType::TEMPERATURE, 100);
        cache.record(origin(5), MsgType::TEMPERATURE, 600_000);

        // First entry is stale and gets evicted; the second is not consulted
        assert!(cache.should_forward(origin(5), MsgType::TEMPERATURE, 600_001));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.iter().next().unwrap().last_seen, 600_000);

        // Now the remaining entry decides
        assert!(!cache.should_forward(origin(5), MsgType::TEMPERATURE, 600_002));
    }
}
