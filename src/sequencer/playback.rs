//! Playback clock - emits fixed-period ticks to subscribed listeners

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{Listeners, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// A note cannot be shorter than this.
    pub millis_per_tick: u64,
    pub ticks_per_measure: u32,
    /// Ticks in one beat, e.g. 4 when a measure has 16.
    pub default_ticks: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            millis_per_tick: 125,
            ticks_per_measure: 16,
            default_ticks: 4,
        }
    }
}

impl ClockConfig {
    /// Tick length for `bpm` beats per minute with `ticks_per_beat` ticks
    /// in each beat (4 gives 16th notes).
    pub fn from_bpm(bpm: f32, ticks_per_beat: u32) -> Result<Self> {
        if !(bpm > 0.0) || ticks_per_beat == 0 {
            return Err(Error::InvalidClockConfig {
                reason: format!("bpm {} with {} ticks per beat", bpm, ticks_per_beat),
            });
        }
        let beats_per_second = bpm / 60.0;
        let ticks_per_second = beats_per_second * ticks_per_beat as f32;
        let config = Self {
            millis_per_tick: (1000.0 / ticks_per_second) as u64,
            ticks_per_measure: ticks_per_beat * 4,
            default_ticks: ticks_per_beat,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.millis_per_tick == 0 {
            "millis_per_tick must be positive"
        } else if self.ticks_per_measure == 0 {
            "ticks_per_measure must be positive"
        } else if self.default_ticks == 0 {
            "default_ticks must be positive"
        } else {
            return Ok(());
        };
        Err(Error::InvalidClockConfig {
            reason: reason.to_string(),
        })
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.millis_per_tick)
    }

    pub fn bpm(&self) -> f32 {
        60_000.0 / (self.millis_per_tick as f32 * self.default_ticks as f32)
    }
}

type TickListeners = Arc<Mutex<Listeners<()>>>;

/// Removes one tick listener.
#[must_use = "dropping this keeps the listener subscribed"]
pub struct Unsubscribe {
    listeners: Weak<Mutex<Listeners<()>>>,
    subscription: Subscription,
}

impl Unsubscribe {
    pub fn unsubscribe(self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => listeners.lock().unsubscribe(self.subscription),
            None => false,
        }
    }
}

pub trait TickSource {
    fn on_tick(&self, callback: Box<dyn FnMut() + Send>) -> Unsubscribe;
}

/// Listeners run on the clock thread while the listener list is locked,
/// so they must not subscribe or unsubscribe from inside a tick.
pub struct Clock {
    config: ClockConfig,
    listeners: TickListeners,
    is_running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Clock {
    pub fn new(config: ClockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            listeners: Arc::new(Mutex::new(Listeners::new())),
            is_running: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
            thread: None,
        })
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Ticks emitted so far, manual or timed.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn start(&mut self) -> Result<()> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ClockAlreadyStarted);
        }

        info!(
            "clock starting at {} ms per tick ({:.1} bpm)",
            self.config.millis_per_tick,
            self.config.bpm()
        );
        let is_running = Arc::clone(&self.is_running);
        let listeners = Arc::clone(&self.listeners);
        let ticks = Arc::clone(&self.ticks);
        let period = self.config.tick_duration();

        self.thread = Some(thread::spawn(move || {
            let mut next_tick = Instant::now() + period;

            while is_running.load(Ordering::SeqCst) {
                let now = Instant::now();

                if now >= next_tick {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    listeners.lock().emit(&());
                    next_tick += period;
                }

                thread::sleep(Duration::from_millis(1));
            }
            debug!("clock thread exiting");
        }));
        Ok(())
    }

    /// Stops emitting ticks. Calling it on a stopped clock does nothing.
    pub fn stop(&mut self) {
        if self.is_running.swap(false, Ordering::SeqCst) {
            info!("clock stopped after {} ticks", self.tick_count());
        }
        self.join_finished();
    }

    /// Emits one tick synchronously on the calling thread.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().emit(&());
    }

    pub fn on_tick(&self, callback: impl FnMut() + Send + 'static) -> Unsubscribe {
        let mut callback = callback;
        let subscription = self.listeners.lock().subscribe(move |_: &()| callback());
        Unsubscribe {
            listeners: Arc::downgrade(&self.listeners),
            subscription,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn join_finished(&mut self) {
        if self.is_running() {
            return;
        }
        if let Some(handle) = self.thread.take() {
            // a listener stopping the clock from the clock thread cannot join itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl TickSource for Clock {
    fn on_tick(&self, callback: Box<dyn FnMut() + Send>) -> Unsubscribe {
        Clock::on_tick(self, callback)
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_config() {
        let config = ClockConfig::default();
        assert_eq!(config.tick_duration(), Duration::from_millis(125));
        assert_eq!(config.bpm(), 120.0);
    }

    #[test]
    fn test_from_bpm() {
        let config = ClockConfig::from_bpm(120.0, 4).unwrap();
        assert_eq!(config.millis_per_tick, 125);
        assert_eq!(config.ticks_per_measure, 16);
        assert!(ClockConfig::from_bpm(0.0, 4).is_err());
        assert!(ClockConfig::from_bpm(120.0, 0).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClockConfig {
            millis_per_tick: 0,
            ..ClockConfig::default()
        };
        assert!(matches!(
            Clock::new(config),
            Err(Error::InvalidClockConfig { .. })
        ));
    }

    #[test]
    fn test_manual_tick_and_unsubscribe() {
        let clock = Clock::new(ClockConfig::default()).unwrap();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let unsub_a = {
            let a = a.clone();
            clock.on_tick(move || {
                a.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _unsub_b = {
            let b = b.clone();
            clock.on_tick(move || {
                b.fetch_add(1, Ordering::SeqCst);
            })
        };

        clock.tick();
        assert!(unsub_a.unsubscribe());
        clock.tick();

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(clock.tick_count(), 2);
        assert_eq!(clock.listener_count(), 1);
    }

    #[test]
    fn test_double_start_is_an_error() {
        let mut clock = Clock::new(ClockConfig {
            millis_per_tick: 5,
            ..ClockConfig::default()
        })
        .unwrap();
        clock.start().unwrap();
        assert!(matches!(clock.start(), Err(Error::ClockAlreadyStarted)));
        clock.stop();
        clock.stop();
        assert!(!clock.is_running());
        clock.start().unwrap();
        clock.stop();
    }

    #[test]
    fn test_running_clock_ticks() {
        let mut clock = Clock::new(ClockConfig {
            millis_per_tick: 2,
            ..ClockConfig::default()
        })
        .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let _unsub = {
            let hits = hits.clone();
            clock.on_tick(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        clock.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        clock.stop();
        let after_stop = hits.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }
}
