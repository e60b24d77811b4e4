//! Errors raised by the engine for bad configuration and device failures.
//!
//! Late cancellation and stopping a pitch that never sounded are expected
//! races and never show up here.

use std::path::PathBuf;

use snafu::Snafu;

use crate::notes::Pitch;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Duration must be at least one tick, got {}", ticks))]
    InvalidDuration { ticks: u32 },

    #[snafu(display("Velocity {} is outside 0..=1", velocity))]
    InvalidVelocity { velocity: f32 },

    #[snafu(display("A pattern needs at least one tick slot"))]
    EmptyPattern,

    #[snafu(display("This clock is already started"))]
    ClockAlreadyStarted,

    #[snafu(display("Invalid clock configuration: {}", reason))]
    InvalidClockConfig { reason: String },

    #[snafu(display("Pitch {} is not part of the current scale", pitch))]
    PitchNotInScale { pitch: Pitch },

    #[snafu(display("Scale index {} is outside the scale", index))]
    ScaleIndexOutOfRange { index: i64 },

    #[snafu(display("An instrument needs at least one channel"))]
    NoChannels,

    #[snafu(display("Failed to create MIDI output: {}", message))]
    MidiInit { message: String },

    #[snafu(display("MIDI port {:?} not found", port))]
    MidiPortNotFound { port: String },

    #[snafu(display("Failed to connect: {}", message))]
    MidiConnect { message: String },

    #[snafu(display("Failed to send MIDI message: {}", message))]
    MidiSend { message: String },

    #[snafu(display("Could not read config {}: {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse config {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
