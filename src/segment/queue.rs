//! Generic k-way merge queue.
//!
//! One utility drives both levels of the postings merge: the field-level
//! queue keyed by field name and the term-level queue keyed by term bytes.
//! Ties pop in ascending `tie` order (the cursor's segment ordinal), which
//! makes fan-in of equal keys deterministic and keeps remapped doc ids
//! ascending within a merged term.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

struct Entry<K: Ord, T> {
    key: K,
    tie: u32,
    value: T,
}

impl<K: Ord, T> PartialEq for Entry<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.tie == other.tie
    }
}

impl<K: Ord, T> Eq for Entry<K, T> {}

impl<K: Ord, T> PartialOrd for Entry<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for Entry<K, T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.tie.cmp(&other.tie))
    }
}

/// A min-heap of values ordered by key, with a caller-supplied tie-break.
pub struct MergeQueue<K: Ord, T> {
    heap: BinaryHeap<Reverse<Entry<K, T>>>,
}

impl<K: Ord, T> MergeQueue<K, T> {
    /// Create a queue with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        MergeQueue {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Insert a value under `key`; equal keys pop in ascending `tie` order.
    pub fn push(&mut self, key: K, tie: u32, value: T) {
        self.heap.push(Reverse(Entry { key, tie, value }));
    }

    /// The smallest key currently queued.
    pub fn peek_key(&self) -> Option<&K> {
        self.heap.peek().map(|Reverse(entry)| &entry.key)
    }

    /// Remove and return the entry with the smallest key.
    pub fn pop(&mut self) -> Option<(K, T)> {
        self.heap.pop().map(|Reverse(entry)| (entry.key, entry.value))
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_ascending_key_order() {
        let mut queue = MergeQueue::with_capacity(4);
        queue.push("pear", 0, 'a');
        queue.push("apple", 1, 'b');
        queue.push("orange", 2, 'c');

        assert_eq!(queue.peek_key(), Some(&"apple"));
        assert_eq!(queue.pop(), Some(("apple", 'b')));
        assert_eq!(queue.pop(), Some(("orange", 'c')));
        assert_eq!(queue.pop(), Some(("pear", 'a')));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_ties_pop_in_tie_order() {
        let mut queue = MergeQueue::with_capacity(4);
        queue.push(b"same".to_vec(), 2, "third");
        queue.push(b"same".to_vec(), 0, "first");
        queue.push(b"same".to_vec(), 1, "second");

        assert_eq!(queue.pop().unwrap().1, "first");
        assert_eq!(queue.pop().unwrap().1, "second");
        assert_eq!(queue.pop().unwrap().1, "third");
    }

    #[test]
    fn test_byte_keys_order_lexicographically() {
        let mut queue = MergeQueue::with_capacity(4);
        queue.push(b"ab".to_vec(), 0, 1);
        queue.push(b"aab".to_vec(), 0, 2);
        queue.push(b"b".to_vec(), 0, 3);
        queue.push(b"a".to_vec(), 0, 4);

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop().map(|(_, v)| v)).collect();
        assert_eq!(order, vec![4, 2, 1, 3]);
    }
}
