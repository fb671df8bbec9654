//! Synchronization substrate for a storage engine: a mutex, a semaphore-built condition variable,
//! an atomic pointer cell, a run-once guard and a single-worker background scheduler.

pub mod env;
pub mod error;
pub mod sync;

pub use env::{BackgroundScheduler, Env, SchedulerConfig};
pub use error::{Error, ErrorKind, Result};
