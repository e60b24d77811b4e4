//! gridtone - a scale-locked note activation engine
//!
//! This library provides the pieces behind a grid instrument:
//! - Scales built from mode families, rotations and a tonic
//! - Patterns compiled to per-tick on/off schedules
//! - Activations and a voice-limited player driven by a clock
//! - MIDI output for production use

pub mod config;
pub mod error;
pub mod events;
pub mod instrument;
pub mod midi;
pub mod notes;
pub mod output;
pub mod scale;
pub mod sequencer;
pub mod timer;

// Re-export commonly used types
pub use config::Settings;
pub use error::{Error, Result};
pub use instrument::{Cancel, Instrument, NoteActive, TriggerOptions};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use notes::{Pitch, PitchClass};
pub use output::{OutputSink, Program, SynthOutput};
pub use scale::Scale;
pub use sequencer::{ActivationKind, ActivationPlayer, CancelMode, Clock, ClockConfig, Pattern};
pub use timer::{ManualTimer, ThreadTimer, Timer};
