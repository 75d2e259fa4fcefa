//! Per-second rolling accumulator
//!
//! Two live slots receive increments for the current second (indexed by
//! epoch parity). When a caller observes a newer second it races a CAS on the
//! stored epoch; the single winner moves the finished slot into a ring of
//! completed seconds indexed by `epoch % RING_SECONDS`. Readers only ever
//! scan the ring plus the one live slot, so marking never takes a lock.

use std::sync::atomic::{AtomicI64, Ordering};

/// Seconds of history retained in the ring.
pub const RING_SECONDS: i64 = 300;

const EMPTY_EPOCH: i64 = -1;

#[derive(Default)]
struct Slot {
    total: AtomicI64,
    count: AtomicI64,
}

struct Bucket {
    epoch: AtomicI64,
    total: AtomicI64,
    count: AtomicI64,
}

impl Bucket {
    fn empty() -> Self {
        Self {
            epoch: AtomicI64::new(EMPTY_EPOCH),
            total: AtomicI64::new(0),
            count: AtomicI64::new(0),
        }
    }

    /// Consistent (total, count) for `epoch`, or None when the bucket holds
    /// another second or is being rewritten.
    fn read(&self, epoch: i64) -> Option<(i64, i64)> {
        if self.epoch.load(Ordering::Acquire) != epoch {
            return None;
        }
        let total = self.total.load(Ordering::Acquire);
        let count = self.count.load(Ordering::Acquire);
        (self.epoch.load(Ordering::Acquire) == epoch).then_some((total, count))
    }
}

/// Totals summed over a window of completed seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub total: i64,
    pub count: i64,
}

pub(crate) struct RollingAccumulator {
    epoch: AtomicI64,
    slots: [Slot; 2],
    ring: Box<[Bucket]>,
}

fn slot_index(epoch: i64) -> usize {
    epoch.rem_euclid(2) as usize
}

fn ring_index(epoch: i64) -> usize {
    epoch.rem_euclid(RING_SECONDS) as usize
}

impl RollingAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicI64::new(EMPTY_EPOCH),
            slots: [Slot::default(), Slot::default()],
            ring: (0..RING_SECONDS).map(|_| Bucket::empty()).collect(),
        }
    }

    pub(crate) fn mark_at(&self, now: i64, value: i64) {
        loop {
            let stored = self.epoch.load(Ordering::Acquire);
            if now > stored {
                if self
                    .epoch
                    .compare_exchange(stored, now, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.roll(stored);
                }
                continue;
            }

            // A caller whose clock lags the stored epoch lands in the current slot.
            let slot = &self.slots[slot_index(stored)];
            slot.total.fetch_add(value, Ordering::AcqRel);
            slot.count.fetch_add(1, Ordering::AcqRel);
            return;
        }
    }

    fn roll(&self, finished: i64) {
        if finished == EMPTY_EPOCH {
            return;
        }
        let slot = &self.slots[slot_index(finished)];
        let total = slot.total.swap(0, Ordering::AcqRel);
        let count = slot.count.swap(0, Ordering::AcqRel);

        let bucket = &self.ring[ring_index(finished)];
        bucket.epoch.store(EMPTY_EPOCH, Ordering::Release);
        bucket.total.store(total, Ordering::Release);
        bucket.count.store(count, Ordering::Release);
        bucket.epoch.store(finished, Ordering::Release);
    }

    /// Totals of one completed second, including a finished second that has
    /// not been rolled yet because nobody marked since.
    fn second(&self, epoch: i64, now: i64) -> Option<(i64, i64)> {
        if epoch >= now {
            return None;
        }
        if self.epoch.load(Ordering::Acquire) == epoch {
            let slot = &self.slots[slot_index(epoch)];
            let total = slot.total.load(Ordering::Acquire);
            let count = slot.count.load(Ordering::Acquire);
            if self.epoch.load(Ordering::Acquire) == epoch {
                return Some((total, count));
            }
        }
        self.ring[ring_index(epoch)].read(epoch)
    }

    /// Sum over the `seconds` completed seconds preceding `now`.
    pub(crate) fn window_at(&self, now: i64, seconds: i64) -> WindowTotals {
        let seconds = seconds.clamp(0, RING_SECONDS);
        (now - seconds..now)
            .filter_map(|epoch| self.second(epoch, now))
            .fold(WindowTotals::default(), |acc, (total, count)| WindowTotals {
                total: acc.total + total,
                count: acc.count + count,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_roll_moves_finished_second_into_ring() {
        let acc = RollingAccumulator::new();
        acc.mark_at(1000, 2);
        acc.mark_at(1000, 3);
        acc.mark_at(1001, 7);

        assert_eq!(acc.window_at(1001, 1), WindowTotals { total: 5, count: 2 });
        assert_eq!(acc.window_at(1002, 1), WindowTotals { total: 7, count: 1 });
        assert_eq!(acc.window_at(1002, 2), WindowTotals { total: 12, count: 3 });
    }

    #[test]
    fn test_current_second_is_not_reported() {
        let acc = RollingAccumulator::new();
        acc.mark_at(50, 1);
        assert_eq!(acc.window_at(50, 15), WindowTotals::default());
    }

    #[test]
    fn test_unrolled_second_visible_until_retention_expires() {
        let acc = RollingAccumulator::new();
        acc.mark_at(1000, 4);

        assert_eq!(acc.window_at(1299, 300).total, 4);
        assert_eq!(acc.window_at(1301, 300).total, 0);
    }

    #[test]
    fn test_ring_slot_reuse_discards_old_epoch() {
        let acc = RollingAccumulator::new();
        acc.mark_at(10, 1);
        acc.mark_at(10 + RING_SECONDS, 9);
        acc.mark_at(11 + RING_SECONDS, 0);

        // Second 10 and second 310 share a ring slot; only 310 survives.
        assert_eq!(acc.window_at(12 + RING_SECONDS, 2).total, 9);
        assert_eq!(acc.window_at(12 + RING_SECONDS, RING_SECONDS).total, 9);
    }

    #[test]
    fn test_concurrent_marks_are_not_lost_within_a_second() {
        let acc = Arc::new(RollingAccumulator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        acc.mark_at(7, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acc.window_at(8, 1), WindowTotals { total: 80_000, count: 80_000 });
    }
}
