//! Identifier allocation.
//!
//! Two independent numbering spaces:
//!
//! | Space   | Direction          | Source of truth                         |
//! |---------|--------------------|-----------------------------------------|
//! | request | -1, -2, -3, ...    | [`RequestIdAllocator`], process local   |
//! | order   | increasing         | [`OrderIdAllocator`], ratcheted by the  |
//! |         |                    | broker's next-valid-id                  |
//!
//! Request ids count down so they can never collide with an order id; the
//! error channel keys both spaces through the same `id` field.

use std::sync::atomic::{AtomicI32, Ordering};

/// Lock-free allocator for outbound request ids.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    last: AtomicI32,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an id no other caller of this instance has observed.
    pub fn next(&self) -> i32 {
        self.last.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Order-id allocator. `next()` is monotonically increasing; `ratchet(n)`
/// guarantees the next issued id is at least `n`.
#[derive(Debug)]
pub struct OrderIdAllocator {
    next: AtomicI32,
}

impl Default for OrderIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }
}

impl OrderIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// `allocator = max(allocator, n)`. Never moves backwards.
    pub fn ratchet(&self, n: i32) {
        self.next.fetch_max(n, Ordering::SeqCst);
    }

    /// The id the next call to [`next`](Self::next) would return.
    pub fn peek(&self) -> i32 {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn request_ids_count_down_from_minus_one() {
        let ids = RequestIdAllocator::new();
        assert_eq!(ids.next(), -1);
        assert_eq!(ids.next(), -2);
        assert_eq!(ids.next(), -3);
    }

    #[test]
    fn request_ids_unique_across_threads() {
        let ids = Arc::new(RequestIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..500).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate request id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn ratchet_moves_forward_only() {
        let ids = OrderIdAllocator::new();
        assert_eq!(ids.next(), 1);

        ids.ratchet(100);
        assert_eq!(ids.next(), 100);

        // A stale next-valid-id must not rewind the allocator.
        ids.ratchet(50);
        assert_eq!(ids.next(), 101);
        assert_eq!(ids.peek(), 102);
    }
}
