//! Activations: steppable units of note playback.
//!
//! A [`SequencedActivation`] walks a compiled [`Schedule`] one tick per
//! `step`, looping until it runs out of repetitions or is cancelled. A
//! [`SingleNoteActivation`] just holds one pitch until it is cancelled.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::notes::Pitch;
use crate::output::SharedSink;
use crate::sequencer::pattern::{Command, Pattern, Schedule};
use crate::timer::{Deferred, SharedTimer};

pub const DEFAULT_MIN_HOLD: Duration = Duration::from_millis(300);

pub trait Activation: Send {
    /// Plays the next tick and stops notes that are due.
    /// Returns true once complete; the caller should then discard it.
    fn step(&mut self) -> bool;

    /// Stops everything now. Safe to call more than once.
    fn cancel_immediate(&mut self);

    /// Lets the current repetition finish, then completes.
    fn cancel_loop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    Loop,
    Immediate,
}

/// Shared, cancellable reference to a live activation.
#[derive(Clone)]
pub struct ActivationHandle {
    inner: Arc<Mutex<dyn Activation>>,
}

impl ActivationHandle {
    pub fn new<A: Activation + 'static>(activation: A) -> Self {
        Self {
            inner: Arc::new(Mutex::new(activation)),
        }
    }

    pub fn step(&self) -> bool {
        self.inner.lock().step()
    }

    pub fn cancel_immediate(&self) {
        self.inner.lock().cancel_immediate();
    }

    pub fn cancel_loop(&self) {
        self.inner.lock().cancel_loop();
    }

    pub fn cancel(&self, mode: CancelMode) {
        match mode {
            CancelMode::Loop => self.cancel_loop(),
            CancelMode::Immediate => self.cancel_immediate(),
        }
    }

    pub fn ptr_eq(&self, other: &ActivationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ActivationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationHandle({:p})", Arc::as_ptr(&self.inner))
    }
}

pub struct SequencedActivation {
    schedule: Schedule,
    position: usize,
    repetition: u32,
    /// `None` loops forever.
    max_repetitions: Option<u32>,
    /// Pitches that have appeared in a processed slot. Stops are only sent
    /// for these, so a note is never stopped on its first sounding tick.
    seen: HashSet<Pitch>,
    destroyed: bool,
    sink: SharedSink,
}

impl SequencedActivation {
    pub fn new(schedule: Schedule, repetitions: Option<u32>, sink: SharedSink) -> Self {
        Self {
            schedule,
            position: 0,
            repetition: 0,
            max_repetitions: repetitions,
            seen: HashSet::new(),
            destroyed: false,
            sink,
        }
    }

    pub fn from_pattern(
        pattern: &Pattern,
        repetitions: Option<u32>,
        sink: SharedSink,
    ) -> Result<Self> {
        Ok(Self::new(pattern.compile()?, repetitions, sink))
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn repetition(&self) -> u32 {
        self.repetition
    }

    pub fn max_repetitions(&self) -> Option<u32> {
        self.max_repetitions
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn is_unwinding(&self) -> bool {
        self.max_repetitions == Some(self.repetition)
    }

    /// Stops every pitch the schedule can produce, sounding or not.
    fn unwind(&mut self) {
        trace!("unwinding {} pitches", self.schedule.pitches().len());
        let mut sink = self.sink.lock();
        for &pitch in self.schedule.pitches() {
            sink.stop(pitch);
        }
        self.destroyed = true;
    }
}

impl Activation for SequencedActivation {
    fn step(&mut self) -> bool {
        if self.destroyed {
            return true;
        }

        let unwinding = self.is_unwinding();
        let first_pass = self.repetition == 0;
        {
            let mut sink = self.sink.lock();
            for command in self.schedule.slot(self.position) {
                match *command {
                    Command::On {
                        pitch,
                        velocity,
                        one_time,
                    } => {
                        if (!one_time || first_pass) && !unwinding {
                            sink.start(pitch, velocity);
                        }
                    }
                    Command::Off { pitch } => {
                        if self.seen.contains(&pitch) {
                            sink.stop(pitch);
                        }
                    }
                }
            }
        }
        // marked after the whole slot so an on/off pair sharing a slot on
        // the first pass does not cut the new note
        for command in self.schedule.slot(self.position) {
            self.seen.insert(command.pitch());
        }

        self.position = (self.position + 1) % self.schedule.len();
        if self.position == 0 {
            self.repetition += 1;
        }

        if unwinding {
            self.unwind();
        }
        unwinding
    }

    fn cancel_immediate(&mut self) {
        if !self.destroyed {
            self.unwind();
        }
    }

    fn cancel_loop(&mut self) {
        if !self.destroyed {
            self.max_repetitions = Some(self.repetition + 1);
        }
    }
}

enum NoteState {
    Sounding,
    Destroyed,
}

/// Holds one pitch from construction until cancelled.
///
/// A stop requested sooner than `min_hold` after the start is deferred on
/// the timer until the hold has elapsed, so very short presses still sound.
pub struct SingleNoteActivation {
    pitch: Pitch,
    sink: SharedSink,
    timer: SharedTimer,
    started_at: Instant,
    min_hold: Duration,
    state: NoteState,
    sounding: Arc<AtomicBool>,
    pending_stop: Option<Deferred>,
}

impl SingleNoteActivation {
    pub fn new(
        pitch: Pitch,
        velocity: Option<f32>,
        sink: SharedSink,
        timer: SharedTimer,
        min_hold: Duration,
    ) -> Self {
        sink.lock().start(pitch, velocity);
        let started_at = timer.now();
        Self {
            pitch,
            sink,
            timer,
            started_at,
            min_hold,
            state: NoteState::Sounding,
            sounding: Arc::new(AtomicBool::new(true)),
            pending_stop: None,
        }
    }

    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    /// False once the stop has actually reached the sink.
    pub fn is_sounding(&self) -> bool {
        self.sounding.load(Ordering::SeqCst)
    }

    pub fn pending_stop(&self) -> Option<&Deferred> {
        self.pending_stop.as_ref()
    }
}

impl Activation for SingleNoteActivation {
    fn step(&mut self) -> bool {
        matches!(self.state, NoteState::Destroyed)
    }

    fn cancel_immediate(&mut self) {
        if let NoteState::Destroyed = self.state {
            return;
        }
        self.state = NoteState::Destroyed;

        let held = self
            .timer
            .now()
            .saturating_duration_since(self.started_at);
        if held >= self.min_hold {
            self.sink.lock().stop(self.pitch);
            self.sounding.store(false, Ordering::SeqCst);
            return;
        }

        let remaining = self.min_hold - held;
        debug!("deferring stop of {} by {:?}", self.pitch, remaining);
        let sink = self.sink.clone();
        let sounding = self.sounding.clone();
        let pitch = self.pitch;
        self.pending_stop = Some(self.timer.schedule(
            remaining,
            Box::new(move || {
                sink.lock().stop(pitch);
                sounding.store(false, Ordering::SeqCst);
            }),
        ));
    }

    fn cancel_loop(&mut self) {
        self.cancel_immediate();
    }
}
