//! Where notes go.
//!
//! Activations talk to an [`OutputSink`]: a single voice that can start and
//! stop pitches. An instrument fans those out to [`SynthOutput`]s, which add
//! a MIDI channel and always carry a velocity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::notes::Pitch;

pub trait OutputSink: Send {
    /// `None` velocity leaves the level to the sink.
    fn start(&mut self, pitch: Pitch, velocity: Option<f32>);
    fn stop(&mut self, pitch: Pitch);
    fn set_program(&mut self, _program: &Program) {}
}

pub type SharedSink = Arc<Mutex<dyn OutputSink>>;

/// Wraps a sink for sharing between activations, timers and the caller.
pub fn shared<S: OutputSink + 'static>(sink: S) -> Arc<Mutex<S>> {
    Arc::new(Mutex::new(sink))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub bank: u8,
    pub program: u8,
    #[serde(default)]
    pub name: Option<String>,
}

impl Program {
    pub fn new(bank: u8, program: u8) -> Self {
        Self {
            bank,
            program,
            name: None,
        }
    }
}

pub trait SynthOutput: Send {
    /// `velocity` is 0..=1.
    fn note_on(&mut self, channel: u8, pitch: Pitch, velocity: f32);
    fn note_off(&mut self, channel: u8, pitch: Pitch);
    fn set_program(&mut self, channel: u8, program: &Program);
}

pub type SharedSynth = Arc<Mutex<dyn SynthOutput>>;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Start { pitch: Pitch, velocity: Option<f32> },
    Stop { pitch: Pitch },
    Program(Program),
}

/// Keeps every event it receives. Also tracks which pitches are sounding.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<SinkEvent>,
    sounding: HashMap<Pitch, usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<SinkEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn starts(&self) -> Vec<Pitch> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Start { pitch, .. } => Some(*pitch),
                _ => None,
            })
            .collect()
    }

    pub fn stops(&self) -> Vec<Pitch> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Stop { pitch } => Some(*pitch),
                _ => None,
            })
            .collect()
    }

    pub fn is_sounding(&self, pitch: Pitch) -> bool {
        self.sounding.get(&pitch).copied().unwrap_or(0) > 0
    }

    /// Pitches currently sounding, in ascending order.
    pub fn sounding(&self) -> Vec<Pitch> {
        let mut pitches: Vec<Pitch> = self
            .sounding
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(p, _)| *p)
            .collect();
        pitches.sort_unstable();
        pitches
    }
}

impl OutputSink for RecordingSink {
    fn start(&mut self, pitch: Pitch, velocity: Option<f32>) {
        trace!("start {} velocity={:?}", pitch, velocity);
        *self.sounding.entry(pitch).or_default() += 1;
        self.events.push(SinkEvent::Start { pitch, velocity });
    }

    fn stop(&mut self, pitch: Pitch) {
        trace!("stop {}", pitch);
        if let Some(n) = self.sounding.get_mut(&pitch) {
            *n = n.saturating_sub(1);
        }
        self.events.push(SinkEvent::Stop { pitch });
    }

    fn set_program(&mut self, program: &Program) {
        self.events.push(SinkEvent::Program(program.clone()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthEvent {
    NoteOn {
        channel: u8,
        pitch: Pitch,
        velocity: f32,
    },
    NoteOff {
        channel: u8,
        pitch: Pitch,
    },
    Program {
        channel: u8,
        program: Program,
    },
}

/// Channelled counterpart of [`RecordingSink`].
#[derive(Debug, Default)]
pub struct RecordingSynth {
    events: Vec<SynthEvent>,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SynthEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<SynthEvent> {
        std::mem::take(&mut self.events)
    }
}

impl SynthOutput for RecordingSynth {
    fn note_on(&mut self, channel: u8, pitch: Pitch, velocity: f32) {
        trace!("noteon {} channel={} velocity={}", pitch, channel, velocity);
        self.events.push(SynthEvent::NoteOn {
            channel,
            pitch,
            velocity,
        });
    }

    fn note_off(&mut self, channel: u8, pitch: Pitch) {
        trace!("noteoff {} channel={}", pitch, channel);
        self.events.push(SynthEvent::NoteOff { channel, pitch });
    }

    fn set_program(&mut self, channel: u8, program: &Program) {
        self.events.push(SynthEvent::Program {
            channel,
            program: program.clone(),
        });
    }
}
