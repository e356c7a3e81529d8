//! Controller-side worker bookkeeping.

use std::collections::HashMap;

use taskfarm_transport::Rank;

/// Per-worker slot at the controller.
#[derive(Debug, Clone, Copy, Default)]
struct WorkerSlot {
    active: bool,
}

/// Mapping from worker rank to its slot.
///
/// A worker is *active* when exactly one item has been sent to it whose
/// result has not yet been collected. A rank that was never activated is
/// not active.
#[derive(Debug, Default)]
pub struct WorkerPool {
    slots: HashMap<Rank, WorkerSlot>,
}

impl WorkerPool {
    /// Create an empty pool. Slots appear on first activation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a worker as holding an outstanding item.
    pub fn activate(&mut self, rank: Rank) {
        self.slots.entry(rank).or_default().active = true;
    }

    /// Mark a worker as idle. A no-op for ranks never activated.
    pub fn deactivate(&mut self, rank: Rank) {
        if let Some(slot) = self.slots.get_mut(&rank) {
            slot.active = false;
        }
    }

    /// Whether the worker holds an outstanding item.
    pub fn is_active(&self, rank: Rank) -> bool {
        self.slots.get(&rank).map_or(false, |slot| slot.active)
    }

    /// Number of workers currently holding an outstanding item.
    pub fn active_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.active).count()
    }
}

/// Cursor over the worker ranks used by the teardown sweep.
///
/// Yields every rank except the controller exactly once per pass, in rank
/// order, then returns `None` and resets for the next pass.
#[derive(Debug, Default)]
pub struct NodeCursor {
    next: usize,
}

impl NodeCursor {
    /// Create a cursor at the start of a pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next worker rank, or `None` at the end of the pass.
    pub fn next_node(&mut self, size: usize, controller: Rank) -> Option<Rank> {
        while self.next < size {
            let rank = self.next as Rank;
            self.next += 1;
            if rank != controller {
                return Some(rank);
            }
        }
        self.next = 0;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_until_first_activation() {
        let pool = WorkerPool::new();
        assert!(!pool.is_active(1));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_activate_deactivate() {
        let mut pool = WorkerPool::new();
        pool.activate(2);
        assert!(pool.is_active(2));
        assert_eq!(pool.active_count(), 1);

        pool.deactivate(2);
        assert!(!pool.is_active(2));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_deactivate_unknown_rank_is_noop() {
        let mut pool = WorkerPool::new();
        pool.deactivate(9);
        assert!(!pool.is_active(9));
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let mut pool = WorkerPool::new();
        pool.activate(1);
        pool.deactivate(1);
        pool.deactivate(1);
        assert!(!pool.is_active(1));
    }

    #[test]
    fn test_cursor_skips_controller() {
        let mut cursor = NodeCursor::new();
        let mut ranks = Vec::new();
        while let Some(rank) = cursor.next_node(4, 0) {
            ranks.push(rank);
        }
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_cursor_skips_nonzero_controller() {
        let mut cursor = NodeCursor::new();
        let mut ranks = Vec::new();
        while let Some(rank) = cursor.next_node(4, 2) {
            ranks.push(rank);
        }
        assert_eq!(ranks, vec![0, 1, 3]);
    }

    #[test]
    fn test_cursor_resets_after_pass() {
        let mut cursor = NodeCursor::new();
        while cursor.next_node(3, 0).is_some() {}
        // A fresh pass starts from the beginning.
        assert_eq!(cursor.next_node(3, 0), Some(1));
    }

    #[test]
    fn test_cursor_single_rank_group() {
        let mut cursor = NodeCursor::new();
        assert_eq!(cursor.next_node(1, 0), None);
    }
}
