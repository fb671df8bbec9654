//! Cheap per-thread identity.
//!
//! [std::thread::ThreadId] can't be stored in an atomic, so every thread takes a number
//! from a global counter on first use. 0 is reserved for "nobody".

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

pub const NO_THREAD: u64 = 0;

fn allocate_token() -> u64 {
    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
    // u64 won't overflow within any sane process lifetime
    NEXT_TOKEN.fetch_add(1, Relaxed)
}

thread_local! {
    static TOKEN: u64 = allocate_token();
}

/// identity of the calling thread, never [NO_THREAD]
pub fn current() -> u64 {
    TOKEN.with(|t| *t)
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn stable_within_a_thread_and_unique_across() {
        let here = current();
        assert_ne!(here, NO_THREAD);
        assert_eq!(here, current());

        let there = thread::spawn(current).join().unwrap();
        assert_ne!(here, there);
    }
}
