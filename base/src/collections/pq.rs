//! A keyed priority queue which yields the *smallest* priority first.
//!
//! [`keyed_priority_queue::KeyedPriorityQueue`] is a max-queue; the
//! simulator schedules deferred device callbacks by due time and
//! always wants the soonest one, so we flip the ordering with
//! [`std::cmp::Reverse`] and hide that detail from callers.

use std::cmp::Reverse;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

pub struct KeyedReversePriorityQueue<K: Hash + Eq, P: Ord> {
    items: KeyedPriorityQueue<K, Reverse<P>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownKey;

impl<K, P> KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    #[must_use]
    pub fn new() -> KeyedReversePriorityQueue<K, P> {
        KeyedReversePriorityQueue {
            items: KeyedPriorityQueue::new(),
        }
    }

    /// The entry with the smallest priority, if any.
    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.0))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.0))
    }

    /// Insert or replace; returns the previous priority of `key` if
    /// there was one.
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items.push(key, Reverse(priority)).map(|p| p.0)
    }

    /// Remove the entry for `key`, returning its priority.  Used to
    /// cancel a pending entry synchronously.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        self.items.remove(key).map(|p| p.0)
    }

    /// Change the priority of an existing entry.
    ///
    /// # Errors
    ///
    /// `Err(UnknownKey)` when `key` is not present.
    pub fn set_priority(&mut self, key: &K, priority: P) -> Result<P, UnknownKey> {
        self.items
            .set_priority(key, Reverse(priority))
            .map(|p| p.0)
            .map_err(|_| UnknownKey)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("KeyedReversePriorityQueue")
            .field("len", &self.items.len())
            .field("next", &self.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_priority_comes_out_first() {
        let mut q = KeyedReversePriorityQueue::new();
        q.push("late", 30u32);
        q.push("soon", 10u32);
        q.push("middle", 20u32);
        assert_eq!(q.peek(), Some((&"soon", &10)));
        assert_eq!(q.pop(), Some(("soon", 10)));
        assert_eq!(q.pop(), Some(("middle", 20)));
        assert_eq!(q.pop(), Some(("late", 30)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_replaces_and_returns_previous() {
        let mut q = KeyedReversePriorityQueue::new();
        assert_eq!(q.push('a', 5u32), None);
        assert_eq!(q.push('a', 9u32), Some(5));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_cancels_pending_entry() {
        let mut q = KeyedReversePriorityQueue::new();
        q.push('a', 1u32);
        q.push('b', 2u32);
        assert_eq!(q.remove(&'a'), Some(1));
        assert_eq!(q.remove(&'a'), None);
        assert_eq!(q.pop(), Some(('b', 2)));
    }

    #[test]
    fn set_priority_requires_existing_key() {
        let mut q = KeyedReversePriorityQueue::new();
        q.push('a', 4u32);
        assert_eq!(q.set_priority(&'a', 2u32), Ok(4));
        assert_eq!(q.set_priority(&'b', 1u32), Err(UnknownKey));
    }
}
