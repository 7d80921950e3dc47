//! Priority-ordered queue of pending executions.
//!
//! Backed by a binary heap ordered by priority (higher first), then
//! submission time, then a monotonic sequence number, so dispatch order
//! is deterministic: FIFO within a priority band even when two requests
//! share a timestamp. Removal by id is lazy — the id set is authoritative
//! and stale heap entries are skipped during dequeue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tokio::sync::Mutex;

use testgrid_core::execution::ExecutionRequest;
use testgrid_core::types::Timestamp;

use crate::error::OrchestratorError;

/// One queued execution with its ordering metadata.
#[derive(Debug)]
pub struct QueuedEntry {
    pub request: ExecutionRequest,
    pub submitted_at: Timestamp,
    seq: u64,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    /// Max-heap order: higher priority wins; within a band, the earlier
    /// submission (then the lower sequence number) wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueuedEntry>,
    ids: HashSet<String>,
    next_seq: u64,
}

/// Durable in-process priority queue of not-yet-dispatched executions.
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
}

impl PriorityQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                ids: HashSet::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert a request. Fails if its id is already queued.
    pub async fn enqueue(
        &self,
        request: ExecutionRequest,
        submitted_at: Timestamp,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        if !inner.ids.insert(request.id.clone()) {
            return Err(OrchestratorError::DuplicateId(request.id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedEntry {
            request,
            submitted_at,
            seq,
        });
        Ok(())
    }

    /// Remove and return the highest-priority ready entry, or `None`
    /// when nothing is queued.
    pub async fn dequeue_next(&self) -> Option<QueuedEntry> {
        let mut inner = self.inner.lock().await;
        while let Some(entry) = inner.heap.pop() {
            // Stale entries (removed ids) are skipped here.
            if inner.ids.remove(&entry.request.id) {
                return Some(entry);
            }
        }
        None
    }

    /// Re-insert a dequeued entry with its original metadata.
    ///
    /// Because ordering is (priority, submitted_at, seq), a restored
    /// entry lands back at the front of its priority band. Used when the
    /// pool signals busy so the request is never lost.
    pub async fn restore(&self, entry: QueuedEntry) {
        let mut inner = self.inner.lock().await;
        inner.ids.insert(entry.request.id.clone());
        inner.heap.push(entry);
    }

    /// Remove a still-queued entry by id.
    ///
    /// Returns `false` when the id is not queued (already dispatched or
    /// unknown) — a boolean outcome, not an error.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.lock().await.ids.remove(id)
    }

    /// Number of queued (not yet dispatched) entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.ids.len()
    }

    /// Whether the queue holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
