//! Note sequencing - patterns, activations and the player that ticks them
//! Everything here is independent of the output device

pub mod activation;
pub mod factories;
pub mod pattern;
pub mod playback;
pub mod player;

pub use activation::{
    Activation, ActivationHandle, CancelMode, SequencedActivation, SingleNoteActivation,
};
pub use factories::{ActivationContext, ActivationKind};
pub use pattern::{Command, NoteEvent, Pattern, Schedule};
pub use playback::{Clock, ClockConfig, TickSource, Unsubscribe};
pub use player::{ActivationPlayer, OnComplete};
