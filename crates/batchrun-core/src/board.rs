//! Authoritative, copy-on-write task list.

use std::sync::Arc;

use batchrun_client::SubmitTarget;
use tokio::sync::watch;
use uuid::Uuid;

use crate::task::{Task, TaskId};
use crate::validate::InputSlot;

/// Immutable view of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchSnapshot {
    /// Bumped whenever the list is replaced or cleared; patches carrying an
    /// older generation are dropped.
    pub generation: u64,
    pub run_id: Option<Uuid>,
    pub target: Option<SubmitTarget>,
    pub slots: Vec<InputSlot>,
    pub tasks: Vec<Task>,
}

impl BatchSnapshot {
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        // ids are 1..=N in order
        self.tasks
            .get((id as usize).wrapping_sub(1))
            .filter(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Owns the task list and publishes every mutation as a fresh snapshot.
///
/// Readers get `Arc<BatchSnapshot>` values that never change underneath them.
pub struct TaskBoard {
    tx: watch::Sender<Arc<BatchSnapshot>>,
}

impl TaskBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(BatchSnapshot::default()));
        Self { tx }
    }

    /// Latest snapshot.
    pub fn current(&self) -> Arc<BatchSnapshot> {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BatchSnapshot>> {
        self.tx.subscribe()
    }

    /// Installs a new batch and returns its generation.
    pub fn replace(&self, target: SubmitTarget, slots: Vec<InputSlot>, tasks: Vec<Task>) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|snap| {
            generation = snap.generation + 1;
            *snap = Arc::new(BatchSnapshot {
                generation,
                run_id: Some(Uuid::new_v4()),
                target: Some(target),
                slots,
                tasks,
            });
        });
        generation
    }

    /// Drops the task list.
    pub fn clear(&self) {
        self.tx.send_modify(|snap| {
            *snap = Arc::new(BatchSnapshot {
                generation: snap.generation + 1,
                ..BatchSnapshot::default()
            });
        });
    }

    /// Applies `f` to a copy of task `id` and publishes a new list holding
    /// the patched copy.
    ///
    /// Nothing is published when the generation is stale, the task is
    /// unknown, or `f` returns `false`. Returns whether a new list was
    /// published.
    pub fn patch<F>(&self, generation: u64, id: TaskId, f: F) -> bool
    where
        F: FnOnce(&mut Task) -> bool,
    {
        self.tx.send_if_modified(|snap| {
            if snap.generation != generation {
                return false;
            }
            let Some(idx) = snap.tasks.iter().position(|t| t.id == id) else {
                return false;
            };
            let mut patched = snap.tasks[idx].clone();
            if !f(&mut patched) {
                return false;
            }
            let mut next = BatchSnapshot::clone(snap);
            next.tasks[idx] = patched;
            *snap = Arc::new(next);
            true
        })
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}
