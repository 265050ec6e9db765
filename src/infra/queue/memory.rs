//! In-memory deferral queue ordered by next check time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::core::scheduler::{DeferralQueue, DeferredEntry, EnqueueOutcome};
use crate::util::RequestId;

/// Heap key. Ordered so the max-heap yields the earliest `next_check_ms`,
/// FIFO among equal times.
struct DueEntry {
    next_check_ms: u128,
    seq: u64,
    request_id: RequestId,
}

impl PartialEq for DueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for DueEntry {}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for max-heap: earlier check first, then earlier insertion.
        other
            .next_check_ms
            .cmp(&self.next_check_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of deferred entries with one live entry per request.
///
/// Updates and removals leave the old heap key in place; it is skipped
/// when popped because its sequence number no longer matches the live one.
pub struct InMemoryDeferralQueue {
    live: HashMap<RequestId, (DeferredEntry, u64)>,
    heap: BinaryHeap<DueEntry>,
    next_seq: u64,
}

impl InMemoryDeferralQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn is_stale(&self, key: &DueEntry) -> bool {
        self.live
            .get(&key.request_id)
            .map_or(true, |(_, seq)| *seq != key.seq)
    }

    fn drop_stale_head(&mut self) {
        while self.heap.peek().is_some_and(|head| self.is_stale(head)) {
            self.heap.pop();
        }
    }

    fn compact_if_bloated(&mut self) {
        if self.heap.len() > self.live.len() * 2 + 64 {
            self.heap = self
                .live
                .iter()
                .map(|(id, (entry, seq))| DueEntry {
                    next_check_ms: entry.next_check_ms,
                    seq: *seq,
                    request_id: id.clone(),
                })
                .collect();
        }
    }
}

impl Default for InMemoryDeferralQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferralQueue for InMemoryDeferralQueue {
    fn upsert(&mut self, entry: DeferredEntry) -> EnqueueOutcome {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(DueEntry {
            next_check_ms: entry.next_check_ms,
            seq,
            request_id: entry.request_id.clone(),
        });
        let outcome = match self.live.get_mut(&entry.request_id) {
            Some((existing, existing_seq)) => {
                let escalation_count = existing.escalation_count.max(entry.escalation_count);
                *existing = DeferredEntry {
                    escalation_count,
                    ..entry
                };
                *existing_seq = seq;
                EnqueueOutcome::Merged
            }
            None => {
                self.live.insert(entry.request_id.clone(), (entry, seq));
                EnqueueOutcome::Inserted
            }
        };
        self.compact_if_bloated();
        outcome
    }

    fn pop_due(&mut self, now_ms: u128, limit: usize) -> Vec<DeferredEntry> {
        let mut due = Vec::new();
        while due.len() < limit {
            self.drop_stale_head();
            let Some(head) = self.heap.peek() else {
                break;
            };
            if head.next_check_ms > now_ms {
                break;
            }
            if let Some(key) = self.heap.pop() {
                if let Some((entry, _)) = self.live.remove(&key.request_id) {
                    due.push(entry);
                }
            }
        }
        due
    }

    fn remove(&mut self, request_id: &RequestId) -> Option<DeferredEntry> {
        let removed = self.live.remove(request_id).map(|(entry, _)| entry);
        self.compact_if_bloated();
        removed
    }

    fn get(&self, request_id: &RequestId) -> Option<&DeferredEntry> {
        self.live.get(request_id).map(|(entry, _)| entry)
    }

    fn next_due_ms(&mut self) -> Option<u128> {
        self.drop_stale_head();
        self.heap.peek().map(|head| head.next_check_ms)
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}
