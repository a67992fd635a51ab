//! Signal Limiter
//!
//! A refillable permit counter: `limit` signals per `gap`. Refill is lazy,
//! performed by whichever caller first notices the window has passed, and
//! guarded by a single-slot flag so only one thread resets the counter per
//! window.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, Result};

/// Smallest window a limiter accepts
pub const MIN_GAP: Duration = Duration::from_millis(10);

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const INITIAL_BACKOFF_WITH_DEADLINE: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_FACTOR: f64 = 1.2;

#[derive(Debug)]
pub struct SignalLimiter {
    gap_millis: u64,
    limit: i64,
    permits: AtomicI64,
    /// Process-clock millis after which the next refill may happen
    next_refill: AtomicU64,
    refilling: AtomicBool,
}

impl SignalLimiter {
    pub fn new(gap: Duration, limit: u32) -> Result<Self> {
        if gap < MIN_GAP {
            return Err(Error::Config(format!(
                "signal gap must be at least {:?}, got {:?}",
                MIN_GAP, gap
            )));
        }
        if limit == 0 {
            return Err(Error::Config("signal limit must be at least 1".into()));
        }

        let gap_millis = gap.as_millis() as u64;
        Ok(Self {
            gap_millis,
            limit: i64::from(limit),
            permits: AtomicI64::new(i64::from(limit)),
            next_refill: AtomicU64::new(clock::now_millis() + gap_millis),
            refilling: AtomicBool::new(false),
        })
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_millis)
    }

    pub fn limit(&self) -> u32 {
        self.limit as u32
    }

    /// Permits left in the current window, never negative
    pub fn available(&self) -> u32 {
        self.permits.load(Ordering::Acquire).max(0) as u32
    }

    /// Take one signal without blocking
    pub fn try_acquire(&self) -> bool {
        self.maybe_refill();
        self.permits.fetch_sub(1, Ordering::AcqRel) - 1 >= 0
    }

    /// Take one signal, backing off between attempts.
    ///
    /// Returns false once `deadline` has passed without a signal.
    pub fn acquire(&self, deadline: Option<Duration>) -> bool {
        let started = Instant::now();
        let mut backoff = if deadline.is_some() {
            INITIAL_BACKOFF_WITH_DEADLINE
        } else {
            INITIAL_BACKOFF
        };

        loop {
            if self.try_acquire() {
                return true;
            }

            let mut sleep_for = backoff;
            if let Some(deadline) = deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return false;
                }
                sleep_for = sleep_for.min(deadline - elapsed);
            }
            thread::sleep(sleep_for);
            backoff = backoff.mul_f64(BACKOFF_FACTOR).min(MAX_BACKOFF);
        }
    }

    fn maybe_refill(&self) {
        let now = clock::now_millis();
        if now <= self.next_refill.load(Ordering::Acquire) {
            return;
        }
        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // Re-check: another thread may have refilled between our load and CAS
        if now > self.next_refill.load(Ordering::Acquire) {
            self.permits.store(self.limit, Ordering::Release);
            self.next_refill
                .store(now + self.gap_millis, Ordering::Release);
        }
        self.refilling.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_rejects_excess_within_window() {
        let limiter = SignalLimiter::new(Duration::from_millis(200), 3).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn test_refills_after_gap() {
        let limiter = SignalLimiter::new(Duration::from_millis(30), 2).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        thread::sleep(Duration::from_millis(45));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_acquire_gives_up_at_deadline() {
        let limiter = SignalLimiter::new(Duration::from_secs(10), 1).unwrap();
        assert!(limiter.try_acquire());

        let started = Instant::now();
        assert!(!limiter.acquire(Some(Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_acquire_waits_for_refill() {
        let limiter = SignalLimiter::new(Duration::from_millis(20), 1).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.acquire(None));
    }

    #[test]
    fn test_concurrent_callers_share_one_window() {
        let limiter = Arc::new(SignalLimiter::new(Duration::from_secs(10), 5).unwrap());
        let granted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let granted = Arc::clone(&granted);
                thread::spawn(move || {
                    for _ in 0..10 {
                        if limiter.try_acquire() {
                            granted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(granted.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SignalLimiter::new(Duration::from_millis(5), 1).is_err());
        assert!(SignalLimiter::new(Duration::from_millis(100), 0).is_err());
    }
}
