use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

struct Entry<T> {
    due: Instant,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Single-threaded timer queue.
///
/// Nothing here reads the wall clock: callers pass `now` in, which keeps the
/// queue deterministic under test. Tasks due at the same instant run in the
/// order they were scheduled.
///
/// Besides timers there is a refresh wait list: tasks parked with
/// [`defer_to_refresh`](Scheduler::defer_to_refresh) run at the next display
/// refresh, whenever that happens.
pub struct Scheduler<T> {
    timers: BinaryHeap<Reverse<Entry<T>>>,
    refresh: Vec<T>,
    next_seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            timers: BinaryHeap::new(),
            refresh: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn schedule_at(&mut self, due: Instant, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(Entry { due, seq, task }));
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, task: T) {
        self.schedule_at(now + delay, task);
    }

    pub fn defer_to_refresh(&mut self, task: T) {
        self.refresh.push(task);
    }

    /// Pops the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.timers.peek()?.0.due > now {
            return None;
        }
        self.timers.pop().map(|Reverse(e)| e.task)
    }

    /// Takes every task waiting for a refresh.
    pub fn take_refresh(&mut self) -> Vec<T> {
        std::mem::take(&mut self.refresh)
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(e)| e.due)
    }

    pub fn has_refresh_waiters(&self) -> bool {
        !self.refresh.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty() && self.refresh.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
