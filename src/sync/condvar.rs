//! # Condition variable out of two semaphores
//!
//! No native condvar here: just a private [Mutex] guarding the waiter count and two semaphores
//! used as a handshake channel (Birrell, "Implementing Condition Variables with Semaphores").
//! - `wake` - the signaller releases it to let one parked waiter go
//! - `ack` - the woken waiter releases it to say "I'm past the parking point"
//!
//! [CondVar::wait]:
//! 1. waiters += 1 under the private lock
//! 2. unlock the caller's mutex
//! 3. acquire `wake` (park)
//! 4. release `ack`
//! 5. lock the caller's mutex again
//!
//! [CondVar::signal] holds the private lock for the whole exchange: waiters -= 1, release `wake`,
//! acquire `ack`. So a signal doesn't return before the waiter it released has left the handshake.
//! The price is that the signaller blocks for a moment too.
//!
//! A signal that comes between steps 2 and 3 isn't lost, the permit just sits in `wake` until
//! the waiter gets there.
//!
//! Since signals are serialised by the private lock, every `ack` permit is consumed by the same
//! signaller whose `wake` permit produced it.
//!
//! ## Broadcast
//!
//! [CondVar::signal_all] takes a snapshot of the waiter count and zeroes it under the private lock,
//! then does exactly that many wake/ack rounds. New waiters can't register while it runs (they'd
//! need the private lock), so they simply wait for the next signal.
//!
//! ## Which mutex
//!
//! While anybody waits, the condvar is tied to the mutex that waiter passed in. A wait with a
//! different one at the same time is a [ContractViolation](crate::error::ErrorKind::ContractViolation).
//! Once the last waiter is released the binding is free again, so a mutex/condvar pair that
//! got moved keeps working.
//! Holding the lock is proven by passing the [MutexGuard] in.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use super::{
    mutex::{Mutex, MutexGuard},
    semaphore::Semaphore,
};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct CondVar {
    waiters: Mutex<usize>,
    wake: Semaphore,
    ack: Semaphore,
    // address of the waiters' mutex, only meaningful while waiters > 0
    bound_mutex: AtomicUsize,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(0),
            wake: Semaphore::new(0),
            ack: Semaphore::new(0),
            bound_mutex: AtomicUsize::new(0),
        }
    }

    /// Unlocks the guard's mutex, blocks until signalled, locks it again.
    ///
    /// Wake-ups should be treated as hints: re-check the condition in a loop.
    pub fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> Result<MutexGuard<'a, Y>> {
        let mutex = guard.mutex;
        mutex.assert_held();

        let addr = mutex as *const Mutex<Y> as usize;
        let mut waiters = self.waiters.lock();
        // the private lock orders every access to the binding
        if *waiters == 0 {
            self.bound_mutex.store(addr, Relaxed);
        } else if self.bound_mutex.load(Relaxed) != addr {
            return Err(Error::contract_violation(
                "condvar is already associated with another mutex",
            ));
        }
        *waiters += 1;
        drop(waiters);
        drop(guard);

        self.wake.acquire();
        let acked = self.ack.release();

        let guard = mutex.lock();
        acked.map(|_| guard)
    }

    /// Releases one waiter and returns once it acknowledged. No-op without waiters.
    pub fn signal(&self) -> Result<()> {
        let mut waiters = self.waiters.lock();
        if *waiters > 0 {
            self.wake.release()?;
            *waiters -= 1;
            self.ack.acquire();
        }
        Ok(())
    }

    /// Releases everybody who was waiting when the call started, returns how many that was.
    pub fn signal_all(&self) -> Result<usize> {
        let mut waiters = self.waiters.lock();
        let snapshot = *waiters;
        for released in 0..snapshot {
            if let Err(e) = self.wake.release() {
                *waiters = snapshot - released;
                return Err(e);
            }
            self.ack.acquire();
        }
        *waiters = 0;
        Ok(snapshot)
    }

    /// Number of threads registered in [CondVar::wait] and not released yet.
    pub fn waiters(&self) -> usize {
        *self.waiters.lock()
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

pub fn run() {
    let ready = Mutex::new(false);
    let condvar = CondVar::new();
    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(100));
            *ready.lock() = true;
            if let Err(e) = condvar.signal() {
                log::error!("signal failed: {e}");
            }
        });

        let mut g = ready.lock();
        while !*g {
            g = match condvar.wait(g) {
                Ok(g) => g,
                Err(e) => {
                    log::error!("wait failed: {e}");
                    return;
                }
            };
        }
        log::info!("woken up, the flag is set");
    });
}
