//! # Run once
//!
//! A one-word, three-state initialization guard:
//! - [OncePhase::Uninitialized] - nobody tried yet
//! - [OncePhase::Executing] - somebody won the compare-exchange and runs the initializer
//! - [OncePhase::Done] - finished, every call returns right away
//!
//! Losers of the race don't park, they spin with [std::thread::yield_now] until the state says
//! [OncePhase::Done]. Initializers are expected to be short, it's a start-up thing.
//!
//! The Release store of Done pairs with the Acquire loads, so everything the initializer wrote
//! is visible to every caller once [run_once] returns.
//!
//! If the initializer panics, the state falls back to Uninitialized and the panic goes on to the
//! caller. Whoever calls next runs the initializer again.

use std::{
    sync::atomic::{
        AtomicU8,
        Ordering::{Acquire, Release},
    },
    thread,
};

use strum_macros::Display;

const UNINITIALIZED: u8 = 0;
const EXECUTING: u8 = 1;
const DONE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OncePhase {
    Uninitialized,
    Executing,
    Done,
}

#[derive(Debug)]
pub struct OnceState {
    state: AtomicU8,
}

impl OnceState {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    pub fn phase(&self) -> OncePhase {
        match self.state.load(Acquire) {
            UNINITIALIZED => OncePhase::Uninitialized,
            EXECUTING => OncePhase::Executing,
            _ => OncePhase::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Acquire) == DONE
    }

    pub fn call_once<F>(&self, initializer: F)
    where
        F: FnOnce(),
    {
        run_once(self, initializer)
    }
}

impl Default for OnceState {
    fn default() -> Self {
        Self::new()
    }
}

/// puts the state back if the initializer unwinds
struct ResetOnUnwind<'a>(&'a AtomicU8);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.store(UNINITIALIZED, Release);
    }
}

/// Runs `initializer` at most once per `once`, and doesn't return before it has finished,
/// no matter which thread ran it.
pub fn run_once<F>(once: &OnceState, initializer: F)
where
    F: FnOnce(),
{
    if once.state.load(Acquire) == DONE {
        return;
    }

    loop {
        match once
            .state
            .compare_exchange(UNINITIALIZED, EXECUTING, Acquire, Acquire)
        {
            Ok(_) => {
                let reset = ResetOnUnwind(&once.state);
                initializer();
                std::mem::forget(reset);
                once.state.store(DONE, Release);
                return;
            }
            Err(DONE) => return,
            Err(_) => {
                while once.state.load(Acquire) == EXECUTING {
                    thread::yield_now();
                }
                // Done or, after a panicking initializer, Uninitialized again
            }
        }
    }
}

pub fn run() {
    static ONCE: OnceState = OnceState::new();
    let runs = std::sync::atomic::AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                run_once(&ONCE, || {
                    runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                })
            });
        }
    });
    log::info!(
        "8 racing callers, initializer ran {} time(s), phase is {}",
        runs.into_inner(),
        ONCE.phase()
    );
}
