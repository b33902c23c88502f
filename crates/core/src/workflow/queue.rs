//! Pending work for workflow items.
//!
//! Work is keyed by item id rather than position, so inserting or removing
//! items while work is pending never points a task at the wrong item. The
//! position is resolved when a task is popped.

use uuid::Uuid;

/// A unit of work on one item. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Estimate,
    Apply,
    Plot,
}

/// Deduplicated set of pending tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Vec<(Uuid, TaskKind)>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `kind` for `item`. Returns `false` if it was already queued.
    pub fn push(&mut self, item: Uuid, kind: TaskKind) -> bool {
        if self.contains(item, kind) {
            return false;
        }
        self.pending.push((item, kind));
        true
    }

    pub fn contains(&self, item: Uuid, kind: TaskKind) -> bool {
        self.pending.contains(&(item, kind))
    }

    /// Drop every task for `item`.
    pub fn forget(&mut self, item: Uuid) {
        self.pending.retain(|(id, _)| *id != item);
    }

    /// Take the task that runs first: the front-most item, and for that
    /// item estimate before apply before plot.
    ///
    /// `position` maps an item id to its current index. Tasks whose item
    /// no longer exists are discarded.
    pub fn pop<F>(&mut self, position: F) -> Option<(usize, Uuid, TaskKind)>
    where
        F: Fn(Uuid) -> Option<usize>,
    {
        self.pending.retain(|(id, _)| position(*id).is_some());
        let (slot, index) = self
            .pending
            .iter()
            .enumerate()
            .filter_map(|(slot, (id, kind))| position(*id).map(|idx| (slot, (idx, *kind))))
            .min_by_key(|(_, key)| *key)
            .map(|(slot, (idx, _))| (slot, idx))?;
        let (id, kind) = self.pending.remove(slot);
        Some((index, id, kind))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
