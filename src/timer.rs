//! Wall-clock deferral for actions that run outside the tick cycle.
//!
//! `ThreadTimer` is the real thing. `ManualTimer` only moves when told to,
//! which lets tests check wall-clock behaviour without sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

pub type Task = Box<dyn FnOnce() + Send>;

pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;

    /// Runs `task` once `delay` has elapsed, unless cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> Deferred;
}

pub type SharedTimer = Arc<dyn Timer>;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct Deferred {
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
}

impl Deferred {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn run(&self, task: Task) {
        if !self.is_cancelled() {
            task();
            self.fired.store(true, Ordering::SeqCst);
        }
    }
}

/// One sleeper thread per scheduled task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn shared() -> SharedTimer {
        Arc::new(ThreadTimer)
    }
}

impl Timer for ThreadTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> Deferred {
        let handle = Deferred::default();
        let deferred = handle.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            deferred.run(task);
        });
        handle
    }
}

struct Pending {
    due: Duration,
    seq: u64,
    handle: Deferred,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    pending: Vec<Pending>,
}

/// A timer whose clock only moves through [`ManualTimer::advance`].
pub struct ManualTimer {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    pub fn shared() -> Arc<ManualTimer> {
        Arc::new(Self::new())
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Moves the clock forward, running due tasks in due order. Tasks run
    /// with the clock set to their due time and without the timer locked.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().elapsed + by;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due_index = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= target)
                    .min_by_key(|(_, p)| (p.due, p.seq))
                    .map(|(i, _)| i);
                match due_index {
                    Some(i) => {
                        let pending = state.pending.remove(i);
                        state.elapsed = state.elapsed.max(pending.due);
                        Some(pending)
                    }
                    None => {
                        state.elapsed = target;
                        None
                    }
                }
            };
            match next {
                Some(pending) => {
                    trace!("manual timer firing task due at {:?}", pending.due);
                    pending.handle.run(pending.task);
                }
                None => break,
            }
        }
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn schedule(&self, delay: Duration, task: Task) -> Deferred {
        let handle = Deferred::default();
        let mut state = self.state.lock();
        let due = state.elapsed + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Pending {
            due,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_manual_timer_runs_due_tasks_in_order() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(30, "c"), (10, "a"), (20, "b")] {
            let log = log.clone();
            timer.schedule(
                Duration::from_millis(delay),
                Box::new(move || log.lock().push(tag)),
            );
        }

        timer.advance(Duration::from_millis(15));
        assert_eq!(*log.lock(), vec!["a"]);
        timer.advance(Duration::from_millis(15));
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(timer.elapsed(), Duration::from_millis(30));
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let timer = ManualTimer::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = hits.clone();
            timer.schedule(
                Duration::from_millis(5),
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        handle.cancel();
        timer.advance(Duration::from_millis(10));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!handle.has_fired());
    }

    #[test]
    fn test_now_follows_advance() {
        let timer = ManualTimer::new();
        let start = timer.now();
        timer.advance(Duration::from_millis(250));
        assert_eq!(timer.now() - start, Duration::from_millis(250));
    }

    #[test]
    fn test_thread_timer_fires() {
        let timer = ThreadTimer;
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = hits.clone();
            timer.schedule(
                Duration::from_millis(1),
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.has_fired() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
