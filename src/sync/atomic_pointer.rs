/*
 * A lock-free pointer-sized cell to pass addresses between threads.
 *
 * It owns nothing: whatever the pointer points to is managed by the caller.
 * The acquire/release pair gives the usual message-passing guarantee:
 * everything written before release_store is visible after an acquire_load that sees the value.
 * The no_barrier_* pair is Relaxed - the ordering has to come from somewhere else (e.g. a mutex).
 */

use std::{
    fmt,
    ptr,
    sync::atomic::{
        AtomicPtr,
        Ordering::{Acquire, Relaxed, Release},
    },
};

pub struct AtomicPointer<T> {
    rep: AtomicPtr<T>,
}

impl<T> AtomicPointer<T> {
    pub const fn new(p: *mut T) -> Self {
        Self {
            rep: AtomicPtr::new(p),
        }
    }

    pub const fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    pub fn acquire_load(&self) -> *mut T {
        self.rep.load(Acquire)
    }

    pub fn release_store(&self, v: *mut T) {
        self.rep.store(v, Release);
    }

    pub fn no_barrier_load(&self) -> *mut T {
        self.rep.load(Relaxed)
    }

    pub fn no_barrier_store(&self, v: *mut T) {
        self.rep.store(v, Relaxed);
    }
}

impl<T> Default for AtomicPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for AtomicPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicPointer")
            .field(&self.no_barrier_load())
            .finish()
    }
}

pub fn run() {
    struct Payload {
        a: u64,
        b: String,
    }

    let cell = AtomicPointer::<Payload>::null();
    std::thread::scope(|s| {
        s.spawn(|| {
            let payload = Box::new(Payload {
                a: 42,
                b: "hello".to_string(),
            });
            cell.release_store(Box::into_raw(payload));
        });

        let p = loop {
            let p = cell.acquire_load();
            if !p.is_null() {
                break p;
            }
            std::hint::spin_loop();
        };
        // SAFETY: the writer handed the box over and never touches it again
        let payload = unsafe { Box::from_raw(p) };
        log::info!("received a = {}, b = {}", payload.a, payload.b);
    });
}
