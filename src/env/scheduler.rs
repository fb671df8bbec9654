//! # Background scheduler
//!
//! One worker thread draining a FIFO queue of closures: a many-producers, single-consumer work queue
//! made of the crate's own [Mutex] and [CondVar].
//!
//! Lifecycle: not started -> running -> stopping -> stopped.
//! - the first [BackgroundScheduler::schedule] spawns the worker
//! - [BackgroundScheduler::shutdown] stops intake, lets the worker finish what's queued, joins it
//!
//! The worker never holds the lock while a task runs, so a slow task doesn't block producers.
//! A panicking task is logged and the worker moves on to the next one.
//!
//! The queue has no bound: producers that persistently outpace the worker grow it without limit.

use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use super::config::SchedulerConfig;
use crate::{
    error::{Error, Result},
    sync::{thread_token, CondVar, Mutex, MutexGuard},
};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    started: bool,
    stopping: bool,
    exited: bool,
    // a task is being executed right now
    busy: bool,
    worker_token: u64,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    work_ready: CondVar,
    idle: CondVar,
}

pub struct BackgroundScheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                work_ready: CondVar::new(),
                idle: CondVar::new(),
            }),
            config,
        }
    }

    /// Queues `task` to run on the worker thread, starting the worker if needed.
    /// Never waits for the task itself.
    pub fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return Err(Error::shut_down("scheduler doesn't accept tasks anymore"));
        }
        if !state.started {
            self.start_worker(&mut state)?;
        }

        let was_empty = state.queue.is_empty();
        state.queue.push_back(Box::new(task));
        log::trace!("task queued, {} pending", state.queue.len());

        // the worker only ever waits on an empty queue
        if was_empty {
            self.shared.work_ready.signal()?;
        }
        Ok(())
    }

    fn start_worker(&self, state: &mut MutexGuard<'_, State>) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .stack_size(self.config.stack_size)
            .spawn(move || worker_loop(&shared))
            .map_err(|e| {
                Error::primitive_failure("failed to spawn the background worker").with_source(e)
            })?;

        log::debug!("background worker `{}' started", self.config.thread_name);
        state.started = true;
        state.handle = Some(handle);
        Ok(())
    }

    /// Blocks until the queue is empty and no task is running. The worker keeps going afterwards.
    pub fn drain(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.worker_token == thread_token::current() {
            return Err(Error::contract_violation(
                "drain called from a background task would wait for itself",
            ));
        }
        while (state.busy || !state.queue.is_empty()) && !state.exited {
            state = self.shared.idle.wait(state)?;
        }
        Ok(())
    }

    /// Stops accepting tasks, waits until the already queued ones are done and joins the worker.
    ///
    /// Calling it again, or from several threads at once, is fine: one caller joins the worker,
    /// the others wait until it has exited. Called from a task, it only stops the intake and
    /// returns a contract violation, since the worker can't join itself.
    pub fn shutdown(&self) -> Result<()> {
        let handle = {
            let mut state = self.shared.state.lock();
            if !state.stopping {
                state.stopping = true;
                log::debug!("background scheduler is stopping, {} pending", state.queue.len());
            }
            if state.worker_token == thread_token::current() {
                return Err(Error::contract_violation(
                    "shutdown called from a background task can't join the worker",
                ));
            }
            self.shared.work_ready.signal_all()?;
            let handle = state.handle.take();
            if handle.is_none() {
                // somebody else is joining
                while state.started && !state.exited {
                    state = self.shared.idle.wait(state)?;
                }
            }
            handle
        };

        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| Error::primitive_failure("background worker panicked"))?;
            log::debug!("background worker `{}' joined", self.config.thread_name);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().stopping
    }

    /// Tasks queued but not picked up by the worker yet.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("background scheduler didn't shut down cleanly: {e}");
        }
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    state.worker_token = thread_token::current();

    loop {
        while state.queue.is_empty() && !state.stopping {
            state = match shared.work_ready.wait(state) {
                Ok(state) => state,
                Err(e) => {
                    log::error!("background worker can't wait for tasks: {e}");
                    state = shared.state.lock();
                    state.stopping = true;
                    break;
                }
            };
        }

        // empty here means we're stopping
        let Some(task) = state.queue.pop_front() else {
            break;
        };
        state.busy = true;
        drop(state);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            log::error!("background task panicked: {}", panic_message(&*payload));
        }

        state = shared.state.lock();
        state.busy = false;
        if state.queue.is_empty() {
            notify_idle(shared);
        }
    }

    state.exited = true;
    notify_idle(shared);
    log::debug!("background worker exits");
}

fn notify_idle(shared: &Shared) {
    if let Err(e) = shared.idle.signal_all() {
        log::error!("failed to wake drain waiters: {e}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

pub fn run() {
    let scheduler = BackgroundScheduler::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["A", "B", "C"] {
        let order = Arc::clone(&order);
        let scheduled = scheduler.schedule(move || {
            order.lock().push(name);
        });
        if let Err(e) = scheduled {
            log::error!("failed to schedule {name}: {e}");
        }
    }
    if let Err(e) = scheduler.shutdown() {
        log::error!("shutdown failed: {e}");
    }
    log::info!("tasks ran in order {:?}", *order.lock());
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
            mpsc,
        },
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn runs_in_fifo_order() {
        let scheduler = BackgroundScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            scheduler.schedule(move || order.lock().push(name)).unwrap();
        }
        scheduler.drain().unwrap();
        assert_eq!(*order.lock(), ["A", "B", "C"]);
    }

    #[test]
    fn worker_starts_on_first_task() {
        let scheduler = BackgroundScheduler::new();
        assert!(!scheduler.is_started());
        // nothing to wait for
        scheduler.drain().unwrap();

        scheduler.schedule(|| {}).unwrap();
        assert!(scheduler.is_started());
        scheduler.drain().unwrap();
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn idle_worker_wakes_up_for_new_work() {
        let scheduler = BackgroundScheduler::new();
        let (tx, rx) = mpsc::channel();

        for round in 0..3 {
            // give the worker time to park on the empty queue
            sleep(Duration::from_millis(50));
            let tx = tx.clone();
            scheduler.schedule(move || tx.send(round).unwrap()).unwrap();
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(round));
        }
    }

    #[test]
    fn many_producers() {
        const PRODUCERS: usize = 4;
        const TASKS: usize = 250;

        let scheduler = BackgroundScheduler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        scope(|s| {
            for p in 0..PRODUCERS {
                let scheduler = &scheduler;
                let seen = &seen;
                s.spawn(move || {
                    for i in 0..TASKS {
                        let seen = Arc::clone(seen);
                        scheduler.schedule(move || seen.lock().push((p, i))).unwrap();
                    }
                });
            }
        });
        scheduler.drain().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), PRODUCERS * TASKS);
        // every producer's tasks keep their relative order
        for p in 0..PRODUCERS {
            let mine = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i);
            assert!(mine.eq(0..TASKS));
        }
    }

    #[test]
    fn producers_are_not_blocked_by_a_running_task() {
        let scheduler = BackgroundScheduler::new();
        let release = Arc::new(AtomicBool::new(false));

        let r = Arc::clone(&release);
        scheduler
            .schedule(move || {
                while !r.load(Relaxed) {
                    sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        sleep(Duration::from_millis(20));

        // the worker is busy, queueing still works
        scheduler.schedule(|| {}).unwrap();
        scheduler.schedule(|| {}).unwrap();
        assert_eq!(scheduler.pending(), 2);

        release.store(true, Relaxed);
        scheduler.drain().unwrap();
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn panicking_task_doesnt_kill_the_worker() {
        let scheduler = BackgroundScheduler::new();
        let done = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(|| panic!("task failed")).unwrap();
        let d = Arc::clone(&done);
        scheduler
            .schedule(move || {
                d.fetch_add(1, Relaxed);
            })
            .unwrap();

        scheduler.drain().unwrap();
        assert_eq!(done.load(Relaxed), 1);
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn shutdown_finishes_queued_work() {
        let scheduler = BackgroundScheduler::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let d = Arc::clone(&done);
            scheduler
                .schedule(move || {
                    sleep(Duration::from_millis(5));
                    d.fetch_add(1, Relaxed);
                })
                .unwrap();
        }
        scheduler.shutdown().unwrap();
        assert_eq!(done.load(Relaxed), 10);
        assert!(scheduler.is_shut_down());

        let err = scheduler.schedule(|| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShutDown);

        // idempotent
        scheduler.shutdown().unwrap();
        scheduler.drain().unwrap();
    }

    #[test]
    fn concurrent_shutdowns_all_wait_for_the_queue() {
        let scheduler = BackgroundScheduler::new();
        let done = Arc::new(AtomicBool::new(false));

        let d = Arc::clone(&done);
        scheduler
            .schedule(move || {
                sleep(Duration::from_millis(300));
                d.store(true, Relaxed);
            })
            .unwrap();
        sleep(Duration::from_millis(20));

        scope(|s| {
            let first = s.spawn(|| scheduler.shutdown().map_err(|e| e.kind()));
            sleep(Duration::from_millis(50));

            scheduler.shutdown().unwrap();
            assert!(done.load(Relaxed));
            assert_eq!(first.join().unwrap(), Ok(()));
        });
    }

    #[test]
    fn shutdown_before_start() {
        let scheduler = BackgroundScheduler::new();
        scheduler.shutdown().unwrap();
        assert!(!scheduler.is_started());
        assert_eq!(
            scheduler.schedule(|| {}).unwrap_err().kind(),
            ErrorKind::ShutDown
        );
    }

    #[test]
    fn waiting_on_itself_is_a_contract_violation() {
        let scheduler = Arc::new(BackgroundScheduler::new());
        let (tx, rx) = mpsc::channel();

        let s = Arc::clone(&scheduler);
        scheduler
            .schedule(move || {
                let drained = s.drain().map_err(|e| e.kind());
                let stopped = s.shutdown().map_err(|e| e.kind());
                tx.send((drained, stopped)).unwrap();
            })
            .unwrap();

        let (drained, stopped) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(drained, Err(ErrorKind::ContractViolation));
        assert_eq!(stopped, Err(ErrorKind::ContractViolation));

        // intake is closed anyway, and the worker can still be joined from outside
        assert!(scheduler.is_shut_down());
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn drop_joins_the_worker() {
        let done = Arc::new(AtomicBool::new(false));
        {
            let scheduler = BackgroundScheduler::with_config(
                SchedulerConfig::new().thread_name("drop-test"),
            );
            let d = Arc::clone(&done);
            scheduler
                .schedule(move || {
                    assert_eq!(thread::current().name(), Some("drop-test"));
                    sleep(Duration::from_millis(50));
                    d.store(true, Relaxed);
                })
                .unwrap();
        }
        assert!(done.load(Relaxed));
    }
}
