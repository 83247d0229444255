//! The per-plan ready queue.
//!
//! A max-heap keyed by (priority, enqueue order): higher priority first,
//! FIFO among equals. Dedup is not the queue's job; the task state machine
//! only admits one Created→Scheduled transition, so a task can be offered
//! to the queue at most once.

use crate::task::TaskHandle;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One dispatchable unit: the task plus the ancestry recorded on its trace
/// when it runs.
pub(crate) struct ReadyEntry {
    priority: i32,
    seq: u64,
    pub(crate) task: TaskHandle,
    pub(crate) parent: Option<TaskHandle>,
    pub(crate) predecessors: Vec<TaskHandle>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier seq.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of ready-to-run tasks.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task, capturing its priority at enqueue time.
    pub(crate) fn push(
        &mut self,
        task: TaskHandle,
        parent: Option<TaskHandle>,
        predecessors: Vec<TaskHandle>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ReadyEntry {
            priority: task.priority(),
            seq,
            task,
            parent,
            predecessors,
        });
    }

    /// Pops the highest-priority entry; FIFO among equal priorities.
    pub(crate) fn pop(&mut self) -> Option<ReadyEntry> {
        self.heap.pop()
    }
}
