//! Activation patterns an instrument can play from one pressed note.
//!
//! Every kind resolves its notes by walking the current MIDI scale from the
//! pressed pitch, so chords and runs always stay in key.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::notes::Pitch;
use crate::output::SharedSink;
use crate::sequencer::activation::{
    ActivationHandle, SequencedActivation, SingleNoteActivation, DEFAULT_MIN_HOLD,
};
use crate::sequencer::pattern::Pattern;
use crate::sequencer::playback::ClockConfig;
use crate::timer::SharedTimer;

/// Arpeggio notes sit behind the main keyboard notes.
pub const ARPEGGIO_VELOCITY: f32 = 0.5;

/// Scale degrees of a triad, relative to the pressed note.
const TRIAD: [i64; 3] = [0, 2, 4];

/// Continuous patterns hold for this many measures before looping.
const CONTINUOUS_MEASURES: u32 = 12;

pub struct ActivationContext<'a> {
    pub midi_scale: &'a [Pitch],
    pub clock: &'a ClockConfig,
    pub pitch: Pitch,
    pub sink: SharedSink,
    pub timer: SharedTimer,
    pub min_hold: Duration,
}

impl<'a> ActivationContext<'a> {
    pub fn new(
        midi_scale: &'a [Pitch],
        clock: &'a ClockConfig,
        pitch: Pitch,
        sink: SharedSink,
        timer: SharedTimer,
    ) -> Self {
        Self {
            midi_scale,
            clock,
            pitch,
            sink,
            timer,
            min_hold: DEFAULT_MIN_HOLD,
        }
    }

    /// Pitches `degrees` scale steps away from the pressed note, shifted by
    /// `shift` more steps.
    fn degrees(&self, degrees: &[i64], shift: i64) -> Result<Vec<Pitch>> {
        let start = self
            .midi_scale
            .iter()
            .position(|p| *p == self.pitch)
            .ok_or(Error::PitchNotInScale { pitch: self.pitch })?;
        degrees
            .iter()
            .map(|degree| {
                let index = start as i64 + degree + shift;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| self.midi_scale.get(i).copied())
                    .ok_or(Error::ScaleIndexOutOfRange { index })
            })
            .collect()
    }

    fn sequenced(&self, pattern: Pattern, repetitions: Option<u32>) -> Result<ActivationHandle> {
        Ok(ActivationHandle::new(SequencedActivation::from_pattern(
            &pattern,
            repetitions,
            self.sink.clone(),
        )?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ActivationKind {
    /// The pressed note, held until release.
    #[default]
    SingleNote,
    /// Triad for one beat, rest for one beat, looped.
    Chord,
    /// Two long triads followed by a short melodic tail, looped.
    Doodle,
    /// Triad tones low to high at reduced velocity, `offset` scale steps
    /// away from the pressed note.
    Arpeggio { offset: i64 },
    /// Triad tones high to low at reduced velocity.
    ArpeggioHighLow,
    ContinuousChord,
    ContinuousNote,
    /// One quick run up to the pressed note and back down, played once.
    Glissando,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 8] = [
        ActivationKind::SingleNote,
        ActivationKind::Chord,
        ActivationKind::Doodle,
        ActivationKind::Arpeggio { offset: 0 },
        ActivationKind::ArpeggioHighLow,
        ActivationKind::ContinuousChord,
        ActivationKind::ContinuousNote,
        ActivationKind::Glissando,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ActivationKind::SingleNote => "Single note",
            ActivationKind::Chord => "Chord",
            ActivationKind::Doodle => "Doodle",
            ActivationKind::Arpeggio { .. } => "Arpeggio",
            ActivationKind::ArpeggioHighLow => "Arpeggio (down)",
            ActivationKind::ContinuousChord => "Continuous chord",
            ActivationKind::ContinuousNote => "Continuous note",
            ActivationKind::Glissando => "Glissando",
        }
    }

    pub fn build(&self, ctx: &ActivationContext<'_>) -> Result<ActivationHandle> {
        let beat = ctx.clock.default_ticks;
        match *self {
            ActivationKind::SingleNote => Ok(ActivationHandle::new(SingleNoteActivation::new(
                ctx.pitch,
                None,
                ctx.sink.clone(),
                ctx.timer.clone(),
                ctx.min_hold,
            ))),
            ActivationKind::Chord => {
                let notes = ctx.degrees(&TRIAD, 0)?;
                let pattern = Pattern::chord(&notes, beat, None)?.then(Pattern::rest(beat)?);
                ctx.sequenced(pattern, None)
            }
            ActivationKind::Doodle => {
                let notes = ctx.degrees(&TRIAD, 0)?;
                let whole = beat * 2;
                let half = beat;
                let pattern = Pattern::chord(&notes, whole, None)?
                    .then(Pattern::chord(&notes, whole, None)?)
                    .then(Pattern::chord(&ctx.degrees(&[2], 0)?, half, None)?)
                    .then(Pattern::chord(&ctx.degrees(&[4], 0)?, half, None)?)
                    .then(Pattern::chord(&ctx.degrees(&[0], 0)?, half, None)?)
                    .then(Pattern::rest(half)?);
                ctx.sequenced(pattern, None)
            }
            ActivationKind::Arpeggio { offset } => {
                let notes = ctx.degrees(&TRIAD, offset)?;
                ctx.sequenced(arpeggio(&notes, beat)?, None)
            }
            ActivationKind::ArpeggioHighLow => {
                let notes = ctx.degrees(&[4, 2, 0], 0)?;
                ctx.sequenced(arpeggio(&notes, beat)?, None)
            }
            ActivationKind::ContinuousChord => {
                let notes = ctx.degrees(&TRIAD, 0)?;
                let hold = ctx.clock.ticks_per_measure * CONTINUOUS_MEASURES;
                ctx.sequenced(Pattern::chord(&notes, hold, None)?, None)
            }
            ActivationKind::ContinuousNote => {
                let hold = ctx.clock.ticks_per_measure * CONTINUOUS_MEASURES;
                ctx.sequenced(Pattern::chord(&[ctx.pitch], hold, None)?, None)
            }
            ActivationKind::Glissando => {
                let steps: Vec<i64> = (0..8).chain((0..7).rev()).collect();
                let notes = ctx.degrees(&steps, -7)?;
                let last = notes.len() - 1;
                let pattern = notes
                    .iter()
                    .enumerate()
                    .map(|(i, &note)| {
                        let duration = if i == last { beat * 2 } else { 1 };
                        Pattern::chord(&[note], duration, None)
                    })
                    .collect::<Result<Pattern>>()?;
                ctx.sequenced(pattern, Some(1))
            }
        }
    }
}

fn arpeggio(notes: &[Pitch], beat: u32) -> Result<Pattern> {
    notes
        .iter()
        .map(|&note| Pattern::chord(&[note], beat.max(1), Some(ARPEGGIO_VELOCITY)))
        .collect()
}
