//! Timeout manager (spec.md §4.B): an ordered set of expiring client
//! registrations plus "earliest deadline" queries used by the reactor to
//! cap its `epoll_wait` timeout.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::trace;

/// Opaque handle returned by `register`, used to `unregister` later.
/// Carries a generation counter so a stale handle (already popped by
/// `check_timeouts`) is inert rather than silently removing a newer
/// registration that reused the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiryHandle {
    slot: usize,
    generation: u64,
}

impl ExpiryHandle {
    /// Stable key for a side table mapping registrations to their owning
    /// client (e.g. the dispatcher's fd lookup); reused once the slot is
    /// freed, so callers must remove their own entry in `unregister`.
    pub fn index(&self) -> usize {
        self.slot
    }
}

struct Slot {
    generation: u64,
    deadline_us: Option<i64>,
}

struct HeapEntry {
    deadline_us: i64,
    slot: usize,
    generation: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_us == other.deadline_us
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline_us.cmp(&other.deadline_us)
    }
}

/// Ordered collection keyed by deadline, with lazy deletion: `unregister`
/// only invalidates a slot's generation; stale heap entries are skipped
/// when popped. This keeps `register`/`unregister` at `O(log n)`
/// amortized without needing a heap that supports arbitrary-element
/// removal.
pub struct TimeoutManager {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    live_count: usize,
}

impl TimeoutManager {
    pub fn new() -> TimeoutManager {
        TimeoutManager {
            heap: BinaryHeap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            live_count: 0,
        }
    }

    /// Inserts a new expiry registration, or atomically replaces the
    /// caller's previous one if `existing` is given (remove-then-insert,
    /// per spec.md §4.B).
    pub fn register(&mut self, existing: Option<ExpiryHandle>, deadline_us: i64) -> ExpiryHandle {
        if let Some(h) = existing {
            self.unregister(h);
        }
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else {
            self.slots.push(Slot { generation: 0, deadline_us: None });
            self.slots.len() - 1
        };
        let generation = self.slots[slot].generation;
        self.slots[slot].deadline_us = Some(deadline_us);
        self.live_count += 1;
        self.heap.push(Reverse(HeapEntry { deadline_us, slot, generation }));
        ExpiryHandle { slot, generation }
    }

    /// Removes a registration. A no-op if the handle is stale (already
    /// popped by `check_timeouts`, or the wrong generation for its slot).
    pub fn unregister(&mut self, handle: ExpiryHandle) {
        if let Some(slot) = self.slots.get_mut(handle.slot) {
            if slot.generation == handle.generation && slot.deadline_us.is_some() {
                slot.deadline_us = None;
                slot.generation += 1;
                self.free.push(handle.slot);
                self.live_count -= 1;
            }
        }
        // The heap keeps the stale Reverse(HeapEntry) around; it is
        // discarded the next time it reaches the top in `pop_stale`.
    }

    fn pop_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            let stale = match self.slots.get(top.slot) {
                Some(slot) => slot.generation != top.generation || slot.deadline_us.is_none(),
                None => true,
            };
            if stale {
                self.heap.pop();
            } else {
                break;
            }
        }
    }

    pub fn earliest_deadline_us(&mut self) -> Option<i64> {
        self.pop_stale();
        self.heap.peek().map(|Reverse(e)| e.deadline_us)
    }

    /// Milliseconds until the earliest deadline, rounded **up** so a
    /// timed-out client is never missed by a sub-millisecond deficit
    /// (spec.md §4.C step 1, §8 boundary behavior).
    pub fn time_until_earliest_ms(&mut self, now_us: i64) -> Option<i64> {
        self.earliest_deadline_us().map(|deadline| {
            let remaining_us = deadline - now_us;
            if remaining_us <= 0 {
                0
            } else {
                (remaining_us + 999) / 1000
            }
        })
    }

    /// Pops every entry with `deadline <= now_us` and invokes `notify` on
    /// each. After this call, no entry satisfies that condition.
    pub fn check_timeouts<N: FnMut(ExpiryHandle)>(&mut self, now_us: i64, mut notify: N) {
        loop {
            self.pop_stale();
            let ready = match self.heap.peek() {
                Some(Reverse(top)) if top.deadline_us <= now_us => true,
                _ => false,
            };
            if !ready {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            let handle = ExpiryHandle { slot: entry.slot, generation: entry.generation };
            self.slots[entry.slot].deadline_us = None;
            self.slots[entry.slot].generation += 1;
            self.free.push(entry.slot);
            self.live_count -= 1;
            trace!("timeout fired for slot {} (deadline {}us, now {}us)", entry.slot, entry.deadline_us, now_us);
            notify(handle);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn len(&self) -> usize {
        self.live_count
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        TimeoutManager::new()
    }
}
