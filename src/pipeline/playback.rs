//! Playback ordering for concurrently synthesized sentences.
//!
//! Synthesis tasks finish in whatever order their latencies allow. The
//! queue here decides when a finished buffer may be handed to the sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// When synthesized audio is released to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOrder {
    /// Strictly in sentence order; a fast later sentence waits for slower
    /// earlier ones.
    #[default]
    Sequential,
    /// As soon as each synthesis finishes.
    EarliestAvailable,
}

/// Reorders out-of-order completions by sentence index.
#[derive(Debug)]
pub struct PlaybackQueue<T> {
    order: PlaybackOrder,
    /// Completed items indexed by sentence for ordering.
    pending: BTreeMap<usize, T>,
    /// Next index expected by a sequential queue.
    next_index: usize,
}

impl<T> PlaybackQueue<T> {
    pub fn new(order: PlaybackOrder) -> Self {
        Self {
            order,
            pending: BTreeMap::new(),
            next_index: 0,
        }
    }

    pub fn order(&self) -> PlaybackOrder {
        self.order
    }

    /// Adds the item for sentence `index` and returns every item that may
    /// now be played, in play order.
    pub fn push(&mut self, index: usize, item: T) -> Vec<(usize, T)> {
        match self.order {
            PlaybackOrder::EarliestAvailable => vec![(index, item)],
            PlaybackOrder::Sequential => {
                self.pending.insert(index, item);
                let mut ready = Vec::new();
                while let Some(item) = self.pending.remove(&self.next_index) {
                    ready.push((self.next_index, item));
                    self.next_index += 1;
                }
                ready
            }
        }
    }

    /// Items held back waiting for an earlier sentence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_holds_until_gap_filled() {
        let mut queue = PlaybackQueue::new(PlaybackOrder::Sequential);

        assert!(queue.push(2, "c").is_empty());
        assert!(queue.push(1, "b").is_empty());
        assert_eq!(queue.pending_len(), 2);

        let ready = queue.push(0, "a");
        assert_eq!(ready, vec![(0, "a"), (1, "b"), (2, "c")]);
        assert!(queue.is_drained());
    }

    #[test]
    fn test_sequential_in_order_passes_straight_through() {
        let mut queue = PlaybackQueue::new(PlaybackOrder::Sequential);
        assert_eq!(queue.push(0, 'a'), vec![(0, 'a')]);
        assert_eq!(queue.push(1, 'b'), vec![(1, 'b')]);
    }

    #[test]
    fn test_earliest_available_releases_immediately() {
        let mut queue = PlaybackQueue::new(PlaybackOrder::EarliestAvailable);
        assert_eq!(queue.push(2, "c"), vec![(2, "c")]);
        assert_eq!(queue.push(0, "a"), vec![(0, "a")]);
        assert!(queue.is_drained());
    }

    #[test]
    fn test_default_is_sequential() {
        assert_eq!(PlaybackOrder::default(), PlaybackOrder::Sequential);
        let queue: PlaybackQueue<()> = PlaybackQueue::new(PlaybackOrder::default());
        assert_eq!(queue.order(), PlaybackOrder::Sequential);
    }

    #[test]
    fn test_order_serde_names() {
        let json = serde_json::to_string(&PlaybackOrder::EarliestAvailable).unwrap();
        assert_eq!(json, "\"earliest_available\"");
        let order: PlaybackOrder = serde_json::from_str("\"sequential\"").unwrap();
        assert_eq!(order, PlaybackOrder::Sequential);
    }
}
