//! # Counting semaphore
//!
//! The permit count lives in a single `AtomicU32`, so it doubles as the futex word:
//! [Semaphore::acquire] parks on it while it's 0, [Semaphore::release] bumps it and wakes one waiter.
//!
//! The count is capped. Releasing past the cap means the permits aren't paired with acquires anymore,
//! which is reported as a [PrimitiveFailure](crate::error::ErrorKind::PrimitiveFailure) instead of
//! silently growing.

use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

use atomic_wait::{wait, wake_one};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_PERMITS: u32 = 10_000;

#[derive(Debug)]
pub struct Semaphore {
    permits: AtomicU32,
    max_permits: u32,
}

impl Semaphore {
    pub const fn new(permits: u32) -> Self {
        Self::with_max(permits, DEFAULT_MAX_PERMITS)
    }

    pub const fn with_max(permits: u32, max_permits: u32) -> Self {
        Self {
            permits: AtomicU32::new(permits),
            max_permits,
        }
    }

    /// Takes a permit, parks while there's none.
    pub fn acquire(&self) {
        let mut current = self.permits.load(Relaxed);
        loop {
            if current == 0 {
                // spurious wake-ups are fine, we re-check anyway
                wait(&self.permits, 0);
                current = self.permits.load(Relaxed);
                continue;
            }
            match self
                .permits
                .compare_exchange_weak(current, current - 1, Acquire, Relaxed)
            {
                Ok(_) => return,
                Err(v) => current = v,
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Acquire, Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Gives a permit back and wakes one parked [Semaphore::acquire].
    pub fn release(&self) -> Result<()> {
        let max = self.max_permits;
        self.permits
            .fetch_update(Release, Relaxed, |n| (n < max).then(|| n + 1))
            .map_err(|n| {
                Error::primitive_failure(format!(
                    "semaphore overflow: {n} permits, at most {max} allowed"
                ))
            })?;
        wake_one(&self.permits);
        Ok(())
    }

    pub fn available_permits(&self) -> u32 {
        self.permits.load(Relaxed)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize},
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn acquire_blocks_until_release() {
        let sem = Semaphore::new(0);
        let acquired = AtomicBool::new(false);
        scope(|s| {
            s.spawn(|| {
                sem.acquire();
                acquired.store(true, Relaxed);
            });
            sleep(Duration::from_millis(100));
            assert!(!acquired.load(Relaxed));
            sem.release().unwrap();
        });
        assert!(acquired.load(Relaxed));
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn permits_are_counted() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());

        let taken = AtomicUsize::new(0);
        scope(|s| {
            for _ in 0..5 {
                s.spawn(|| {
                    sem.acquire();
                    taken.fetch_add(1, Relaxed);
                });
            }
            for _ in 0..5 {
                sem.release().unwrap();
            }
        });
        assert_eq!(taken.load(Relaxed), 5);
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn overflow_is_a_primitive_failure() {
        let sem = Semaphore::with_max(0, 1);
        sem.release().unwrap();
        let err = sem.release().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrimitiveFailure);
        assert_eq!(sem.available_permits(), 1);
    }
}
