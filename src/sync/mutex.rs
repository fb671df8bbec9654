//! # Mutex
//!
//! The usual 3-state futex mutex:
//! - 0 - unlocked
//! - 1 - locked, no other threads
//! - 2 - locked, other threads are waiting
//!
//! Lock tries a single compare-exchange first, then spins for a short while, then parks on the state
//! through `atomic_wait`. Unlock only wakes somebody if the state says there's somebody to wake,
//! so an uncontended lock/unlock pair doesn't make a single syscall.
//!
//! The Acquire on locking and the Release on unlocking give the happens-before edge between
//! the previous holder's writes and the next holder's reads.
//!
//! ## Holder tracking
//!
//! Unlike a plain futex mutex it also remembers *who* holds it (see [super::thread_token]).
//! That's what [Mutex::assert_held] and [Mutex::check_held] are built on.
//! Unlocking is only possible through the [MutexGuard], which is `!Send`, so the thread that
//! drops the guard is always the one that locked.

use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32, AtomicU64,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

use super::thread_token::{self, NO_THREAD};
use crate::error::{Error, Result};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub struct Mutex<Y> {
    state: AtomicU32,
    holder: AtomicU64,
    value: UnsafeCell<Y>,
}

unsafe impl<Y> Sync for Mutex<Y> where Y: Send {}

impl<Y> Mutex<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            holder: AtomicU64::new(NO_THREAD),
            value: UnsafeCell::new(value),
        }
    }

    /// Blocks until the lock is ours. There's no timeout and no try-lock.
    ///
    /// Locking a mutex the calling thread already holds deadlocks, the same way it does for
    /// [std::sync::Mutex]. Debug builds catch it instead.
    pub fn lock(&self) -> MutexGuard<'_, Y> {
        debug_assert!(
            !self.is_held_by_current_thread(),
            "mutex is already held by the current thread"
        );
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            Self::lock_contended(&self.state);
        }
        self.holder.store(thread_token::current(), Relaxed);
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    #[cold]
    fn lock_contended(state: &AtomicU32) {
        let mut spin_count = 0;

        // only spin while it's 1: 2 means someone already gave up and parked
        while state.load(Relaxed) == LOCKED && spin_count < 100 {
            spin_count += 1;
            std::hint::spin_loop();
        }

        if state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        // leave 2 behind so the unlocker knows to wake us
        while state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(state, CONTENDED);
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.holder.load(Relaxed) == thread_token::current()
    }

    /// [ErrorKind::ContractViolation](crate::error::ErrorKind::ContractViolation)
    /// unless the calling thread holds the lock
    pub fn check_held(&self) -> Result<()> {
        if self.is_held_by_current_thread() {
            Ok(())
        } else {
            Err(Error::contract_violation(
                "mutex is not held by the current thread",
            ))
        }
    }

    /// Panics in debug builds if the calling thread isn't the holder, does nothing in release builds.
    pub fn assert_held(&self) {
        debug_assert!(
            self.is_held_by_current_thread(),
            "mutex is not held by the current thread"
        );
    }

    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y> Default for Mutex<Y>
where
    Y: Default,
{
    fn default() -> Self {
        Self::new(Y::default())
    }
}

impl<Y> fmt::Debug for Mutex<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &(self.state.load(Relaxed) != UNLOCKED))
            .finish_non_exhaustive()
    }
}

/// Proof of holding the lock, unlocks on drop.
pub struct MutexGuard<'a, Y> {
    pub(crate) mutex: &'a Mutex<Y>,
    // the holder is a thread => the guard must not leave it
    _not_send: PhantomData<*const ()>,
}

unsafe impl<Y> Sync for MutexGuard<'_, Y> where Y: Sync {}

impl<Y> MutexGuard<'_, Y> {
    /// Same as dropping the guard, just reads better at call sites.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<Y> Deref for MutexGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists only while the lock is held
        unsafe { &*self.mutex.value.get() }
    }
}

impl<Y> DerefMut for MutexGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists only while the lock is held
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<Y> Drop for MutexGuard<'_, Y> {
    fn drop(&mut self) {
        self.mutex.assert_held();
        self.mutex.holder.store(NO_THREAD, Relaxed);
        // wake only if someone switched the state to 2
        if self.mutex.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.mutex.state);
        }
    }
}

pub fn run() {
    let counter = Mutex::new(0u64);
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..1_000 {
                    *counter.lock() += 1;
                }
            });
        }
    });
    log::info!("4 threads x 1000 increments = {}", *counter.lock());
}
