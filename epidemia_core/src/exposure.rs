//! Day-stamped exposure accumulators.
//!
//! Every accumulator remembers the day its value belongs to. Reading it for
//! any other day yields zero, so nothing has to be cleared between days and
//! a phase that runs twice for the same day cannot double-apply old values.

use crate::probability::combine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Simulation day number.
pub type Day = u32;

/// Stamp stored for `day`. Zero is reserved for "never written".
#[inline]
fn stamp(day: Day) -> u32 {
    day.wrapping_add(1)
}

#[inline]
fn pack(day: Day, value: f32) -> u64 {
    ((stamp(day) as u64) << 32) | value.to_bits() as u64
}

#[inline]
fn unpack(bits: u64, day: Day) -> Option<f32> {
    if (bits >> 32) as u32 == stamp(day) {
        Some(f32::from_bits(bits as u32))
    } else {
        None
    }
}

/// Lock-free accumulator for contributions from a cluster's or city's own
/// population.
///
/// The day stamp and the value share one 64-bit word, so readers never see
/// a value paired with the wrong day.
#[derive(Debug, Default)]
pub struct DayExposure {
    bits: AtomicU64,
}

impl DayExposure {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Value for `day`, or zero if nothing was recorded that day.
    pub fn get(&self, day: Day) -> f32 {
        unpack(self.bits.load(Ordering::Acquire), day).unwrap_or(0.0)
    }

    /// Combines `p` into the value for `day`.
    pub fn add(&self, day: Day, p: f32) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let base = unpack(current, day).unwrap_or(0.0);
            let next = pack(day, combine(base, p));
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Overwrites the value for `day`.
    pub fn set(&self, day: Day, value: f32) {
        self.bits.store(pack(day, value), Ordering::Release);
    }

    /// Returns the value memoized for `day`, computing it with `compute` on
    /// the first call of the day.
    ///
    /// Concurrent first calls may both compute; `compute` must therefore be
    /// a pure function of state that is already final for the day.
    pub fn memo(&self, day: Day, compute: impl FnOnce() -> f32) -> f32 {
        if let Some(value) = unpack(self.bits.load(Ordering::Acquire), day) {
            return value;
        }
        let value = compute();
        self.set(day, value);
        value
    }

    /// True when a value has been recorded for `day`.
    pub fn is_current(&self, day: Day) -> bool {
        unpack(self.bits.load(Ordering::Acquire), day).is_some()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Stamped {
    stamp: u32,
    value: f32,
}

/// Accumulator written by agents that do not own the target city.
#[derive(Debug, Default)]
pub struct ForeignExposure {
    slot: Mutex<Stamped>,
}

impl ForeignExposure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `day`, or zero if nothing was deposited that day.
    pub fn get(&self, day: Day) -> f32 {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.stamp == stamp(day) {
            slot.value
        } else {
            0.0
        }
    }

    /// Combines `p` into the value for `day` under the lock.
    pub fn add(&self, day: Day, p: f32) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.stamp != stamp(day) {
            *slot = Stamped {
                stamp: stamp(day),
                value: 0.0,
            };
        }
        slot.value = combine(slot.value, p);
    }

    /// Starts `day` at zero.
    pub fn reset(&self, day: Day) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Stamped {
            stamp: stamp(day),
            value: 0.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stale_day_reads_zero() {
        let acc = DayExposure::new();
        acc.add(3, 0.25);
        assert_relative_eq!(acc.get(3), 0.25);
        assert_eq!(acc.get(4), 0.0);
        assert_eq!(acc.get(2), 0.0);
    }

    #[test]
    fn test_add_restarts_on_new_day() {
        let acc = DayExposure::new();
        acc.add(1, 0.5);
        acc.add(1, 0.5);
        assert_relative_eq!(acc.get(1), 0.75);
        acc.add(2, 0.1);
        assert_relative_eq!(acc.get(2), 0.1);
    }

    #[test]
    fn test_never_written_is_zero_for_day_zero() {
        let acc = DayExposure::new();
        assert_eq!(acc.get(0), 0.0);
        assert!(!acc.is_current(0));
        let foreign = ForeignExposure::new();
        assert_eq!(foreign.get(0), 0.0);
    }

    #[test]
    fn test_memo_computes_once_per_day() {
        let acc = DayExposure::new();
        let mut calls = 0;
        let first = acc.memo(5, || {
            calls += 1;
            0.3
        });
        let second = acc.memo(5, || {
            calls += 1;
            0.9
        });
        assert_eq!(first, second);
        assert_eq!(calls, 1);
        assert_relative_eq!(acc.memo(6, || 0.9), 0.9);
    }

    #[test]
    fn test_foreign_restarts_on_new_day() {
        let acc = ForeignExposure::new();
        acc.add(1, 0.5);
        acc.add(1, 0.5);
        assert_relative_eq!(acc.get(1), 0.75);
        assert_eq!(acc.get(2), 0.0);
        acc.add(2, 0.2);
        assert_relative_eq!(acc.get(2), 0.2);
    }

    #[test]
    fn test_foreign_concurrent_deposits_lose_nothing() {
        const DEPOSITS: usize = 10_000;
        let p = 1e-5f32;
        let acc = Arc::new(ForeignExposure::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..DEPOSITS {
                        acc.add(7, p);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let serial = ForeignExposure::new();
        for _ in 0..2 * DEPOSITS {
            serial.add(7, p);
        }
        assert_relative_eq!(acc.get(7), serial.get(7), max_relative = 1e-5);
    }

    #[test]
    fn test_lock_free_concurrent_deposits_lose_nothing() {
        const DEPOSITS: usize = 10_000;
        let p = 1e-5f32;
        let acc = Arc::new(DayExposure::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..DEPOSITS {
                        acc.add(7, p);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let serial = DayExposure::new();
        for _ in 0..2 * DEPOSITS {
            serial.add(7, p);
        }
        assert_relative_eq!(acc.get(7), serial.get(7), max_relative = 1e-5);
    }
}
