//! # Synchronization primitives
//!
//! The bottom layer, leaves first:
//! - [Mutex] - exclusive lock with holder tracking, parks through `atomic_wait`
//! - [AtomicPointer] - lock-free pointer cell with acquire/release and relaxed access
//! - [OnceState] + [run_once] - run-once initialization guard
//! - [CondVar] - condition variable made of a [Mutex] and two [Semaphore]s
//!
//! Everything here blocks OS threads, there's no async anywhere.

pub mod atomic_pointer;
pub mod condvar;
pub mod mutex;
pub mod once;
pub mod semaphore;
pub(crate) mod thread_token;

pub use atomic_pointer::AtomicPointer;
pub use condvar::CondVar;
pub use mutex::{Mutex, MutexGuard};
pub use once::{run_once, OncePhase, OnceState};
pub use semaphore::Semaphore;
