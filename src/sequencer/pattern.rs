//! Declarative note patterns and their compiled on/off schedules.
//!
//! A [`Pattern`] is a list of tick slots, each holding the notes that start
//! on that tick. [`Pattern::compile`] turns it into a [`Schedule`]: for each
//! tick, which pitches to start and which to stop.

use crate::error::{Error, Result};
use crate::notes::Pitch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub pitch: Pitch,
    /// `None` sustains until stopped from outside.
    pub duration: Option<u32>,
    /// 0..=1; `None` leaves the level to the sink.
    pub velocity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    slots: Vec<Vec<NoteEvent>>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Vec<NoteEvent>>) -> Self {
        Self { slots }
    }

    /// All `pitches` start together and last `duration` ticks; the pattern
    /// is `duration` slots long.
    pub fn chord(pitches: &[Pitch], duration: u32, velocity: Option<f32>) -> Result<Self> {
        check_duration(duration)?;
        if let Some(velocity) = velocity {
            if !(0.0..=1.0).contains(&velocity) {
                return Err(Error::InvalidVelocity { velocity });
            }
        }
        let mut slots = vec![Vec::new(); duration as usize];
        slots[0] = pitches
            .iter()
            .map(|&pitch| NoteEvent {
                pitch,
                duration: Some(duration),
                velocity,
            })
            .collect();
        Ok(Self { slots })
    }

    /// One slot of notes without a duration: each starts once and is left
    /// for the caller to stop.
    pub fn sustained_chord(pitches: &[Pitch]) -> Self {
        let events = pitches
            .iter()
            .map(|&pitch| NoteEvent {
                pitch,
                duration: None,
                velocity: None,
            })
            .collect();
        Self {
            slots: vec![events],
        }
    }

    pub fn rest(duration: u32) -> Result<Self> {
        check_duration(duration)?;
        Ok(Self {
            slots: vec![Vec::new(); duration as usize],
        })
    }

    /// Appends `other` after this pattern.
    pub fn then(mut self, other: Pattern) -> Self {
        self.slots.extend(other.slots);
        self
    }

    /// Slot-wise union; the shorter side is padded with empty slots.
    pub fn interleave(&self, other: &Pattern) -> Self {
        let len = self.slots.len().max(other.slots.len());
        let slots = (0..len)
            .map(|i| {
                let mut slot = self.slots.get(i).cloned().unwrap_or_default();
                if let Some(theirs) = other.slots.get(i) {
                    slot.extend_from_slice(theirs);
                }
                slot
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Vec<NoteEvent>] {
        &self.slots
    }

    pub fn compile(&self) -> Result<Schedule> {
        Schedule::compile(self)
    }
}

impl FromIterator<Pattern> for Pattern {
    fn from_iter<I: IntoIterator<Item = Pattern>>(iter: I) -> Self {
        iter.into_iter().fold(Pattern::new(), Pattern::then)
    }
}

fn check_duration(ticks: u32) -> Result<()> {
    if ticks == 0 {
        return Err(Error::InvalidDuration { ticks });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    On {
        pitch: Pitch,
        velocity: Option<f32>,
        /// Fires on the first repetition only.
        one_time: bool,
    },
    Off {
        pitch: Pitch,
    },
}

impl Command {
    pub fn pitch(&self) -> Pitch {
        match *self {
            Command::On { pitch, .. } | Command::Off { pitch } => pitch,
        }
    }
}

/// Tick-indexed on/off table. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    slots: Vec<Vec<Command>>,
    pitches: Vec<Pitch>,
}

impl Schedule {
    /// Each timed note gets an `On` at its slot and an `Off` at
    /// `(slot + duration) % len`, so notes may ring across the loop point.
    /// Untimed notes get a one-time `On` and no `Off`.
    pub fn compile(pattern: &Pattern) -> Result<Self> {
        let len = pattern.len();
        if len == 0 {
            return Err(Error::EmptyPattern);
        }

        let mut slots: Vec<Vec<Command>> = vec![Vec::new(); len];
        for (i, events) in pattern.slots().iter().enumerate() {
            for event in events {
                if let Some(duration) = event.duration {
                    slots[(i + duration as usize) % len].push(Command::Off { pitch: event.pitch });
                }
                slots[i].push(Command::On {
                    pitch: event.pitch,
                    velocity: event.velocity,
                    one_time: event.duration.is_none(),
                });
            }
        }

        let mut pitches = Vec::new();
        for command in slots.iter().flatten() {
            if !pitches.contains(&command.pitch()) {
                pitches.push(command.pitch());
            }
        }

        Ok(Self { slots, pitches })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn slot(&self, index: usize) -> &[Command] {
        &self.slots[index % self.slots.len()]
    }

    /// Every pitch that appears anywhere in the schedule, first use first.
    pub fn pitches(&self) -> &[Pitch] {
        &self.pitches
    }
}
