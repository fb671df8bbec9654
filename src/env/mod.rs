//! # Environment
//!
//! What a storage engine needs from the platform besides files: deferred work, threads and a clock.
//!
//! ## The default environment
//!
//! [Env::global] builds one shared [Env] on first use. The construction goes through [run_once]
//! and the result is published through an [AtomicPointer]: the initializer's release store pairs with
//! the acquire load every caller does afterwards.
//!
//! The instance lives until the process exits. It's never dropped, so its worker is only stopped
//! by an explicit [Env::shutdown], which can be called any number of times.

pub mod config;
pub mod scheduler;

use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub use config::SchedulerConfig;
pub use scheduler::{BackgroundScheduler, Task};

use crate::{
    error::{Error, Result},
    sync::{run_once, AtomicPointer, OnceState},
};

pub struct Env {
    scheduler: BackgroundScheduler,
    config: SchedulerConfig,
    started_at: Instant,
}

static DEFAULT_ENV_ONCE: OnceState = OnceState::new();
static DEFAULT_ENV: AtomicPointer<Env> = AtomicPointer::null();

impl Env {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            scheduler: BackgroundScheduler::with_config(config.clone()),
            config,
            started_at: Instant::now(),
        }
    }

    /// The process-wide default environment.
    pub fn global() -> &'static Env {
        run_once(&DEFAULT_ENV_ONCE, || {
            log::debug!("creating the default environment");
            let env: &'static mut Env = Box::leak(Box::new(Env::new(SchedulerConfig::default())));
            DEFAULT_ENV.release_store(env);
        });
        // SAFETY: run_once returned => the pointer is published and points to a leaked, never freed Env
        unsafe { &*DEFAULT_ENV.acquire_load() }
    }

    /// Runs `task` on the background worker, in submission order.
    pub fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.schedule(task)
    }

    /// Starts a standalone thread, named and sized like the background worker.
    pub fn start_thread<F>(&self, f: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(self.config.thread_name.clone())
            .stack_size(self.config.stack_size)
            .spawn(f)
            .map_err(|e| Error::primitive_failure("failed to start a thread").with_source(e))
    }

    /// Monotonic microseconds since this environment was created.
    pub fn now_micros(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }

    fn deadline_after(&self, micros: u64) -> u64 {
        self.now_micros().saturating_add(micros)
    }

    pub fn sleep_for_micros(&self, micros: u64) {
        let end = self.deadline_after(micros);
        loop {
            let now = self.now_micros();
            if now >= end {
                break;
            }
            thread::sleep(Duration::from_micros(end - now));
        }
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    /// Finishes queued work and stops the background worker. Later calls do nothing.
    pub fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

pub fn run() {
    let env = Env::global();
    let started = env.now_micros();
    let (tx, rx) = std::sync::mpsc::channel();
    if let Err(e) = env.schedule(move || {
        let _ = tx.send(thread::current().name().map(str::to_string));
    }) {
        log::error!("failed to schedule: {e}");
        return;
    }
    match rx.recv() {
        Ok(name) => log::info!("task ran on {name:?}"),
        Err(e) => log::error!("task never reported back: {e}"),
    }
    env.sleep_for_micros(1_000);
    log::info!("{}us passed", env.now_micros() - started);
    if let Err(e) = env.shutdown() {
        log::error!("shutdown failed: {e}");
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering::Relaxed},
            mpsc, Arc,
        },
        thread::scope,
    };

    use super::*;

    #[test]
    fn global_is_a_single_instance() {
        let addrs = crate::sync::Mutex::new(Vec::new());
        scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    let env = Env::global() as *const Env as usize;
                    addrs.lock().push(env);
                });
            }
        });
        let addrs = addrs.into_inner();
        assert!(addrs.iter().all(|a| *a == addrs[0]));
        assert!(DEFAULT_ENV_ONCE.is_done());
    }

    #[test]
    fn schedule_goes_to_the_worker() {
        let env = Env::new(SchedulerConfig::new().thread_name("env-test"));
        let (tx, rx) = mpsc::channel();
        env.schedule(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("env-test")
        );

        env.shutdown().unwrap();
        env.shutdown().unwrap();
        assert!(env.schedule(|| {}).is_err());
    }

    #[test]
    fn start_thread_runs_the_closure() {
        let env = Env::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        env.start_thread(move || {
            h.fetch_add(1, Relaxed);
        })
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(hits.load(Relaxed), 1);
    }

    #[test]
    fn clock_is_monotonic_and_sleep_is_long_enough() {
        let env = Env::default();
        let a = env.now_micros();
        env.sleep_for_micros(20_000);
        let b = env.now_micros();
        assert!(b >= a + 20_000);
        env.sleep_for_micros(0);
        assert!(env.now_micros() >= b);
    }

    #[test]
    fn far_deadlines_saturate() {
        let env = Env::default();
        assert_eq!(env.deadline_after(u64::MAX), u64::MAX);
        assert!(env.deadline_after(10) >= 10);
    }
}
