//! Scale state: which family, which rotation, which tonic.
//!
//! The derived MIDI scale is cached and rebuilt by every setter, so reads
//! are never stale. Listeners registered with [`Scale::on_change`] run after
//! each rebuild.

use std::mem;

use tracing::{debug, info};

use crate::events::{Listeners, Subscription};
use crate::notes::{self, Pitch, FAMILIES, SEMITONES_PER_OCTAVE};

pub const MIN_PITCH: Pitch = 12;
pub const MAX_PITCH: Pitch = 120;
pub const DEFAULT_BASE_PITCH: Pitch = 36;
/// Number of grid buttons plus some room for arpeggiation.
pub const DEFAULT_NOTE_COUNT: usize = 128;

pub struct Scale {
    family_index: usize,
    rotation: usize,
    base_start: Pitch,
    start_pitch: Pitch,
    note_count: usize,
    family: Vec<i32>,
    midi_scale: Vec<Pitch>,
    listeners: Listeners<Scale>,
}

impl Scale {
    pub fn new() -> Self {
        Self::with_settings(0, 0, DEFAULT_BASE_PITCH)
    }

    pub fn with_settings(family_index: usize, rotation: i32, start_pitch: Pitch) -> Self {
        let family_index = family_index % FAMILIES.len();
        let rotation = rotation.rem_euclid(FAMILIES[family_index].len() as i32) as usize;
        let mut scale = Self {
            family_index,
            rotation,
            base_start: DEFAULT_BASE_PITCH,
            start_pitch: start_pitch.clamp(MIN_PITCH, MAX_PITCH),
            note_count: DEFAULT_NOTE_COUNT,
            family: Vec::new(),
            midi_scale: Vec::new(),
            listeners: Listeners::new(),
        };
        scale.rebuild();
        scale
    }

    pub fn family_index(&self) -> usize {
        self.family_index
    }

    pub fn rotation(&self) -> usize {
        self.rotation
    }

    /// The lowest note of the scale.
    pub fn start_pitch(&self) -> Pitch {
        self.start_pitch
    }

    pub fn note_count(&self) -> usize {
        self.note_count
    }

    /// The rotated family intervals.
    pub fn family(&self) -> &[i32] {
        &self.family
    }

    pub fn midi_scale(&self) -> &[Pitch] {
        &self.midi_scale
    }

    pub fn pitch_at(&self, index: usize) -> Option<Pitch> {
        self.midi_scale.get(index).copied()
    }

    pub fn index_of(&self, pitch: Pitch) -> Option<usize> {
        self.midi_scale.iter().position(|p| *p == pitch)
    }

    /// Selects a family, wrapping out-of-range indexes, and resets rotation.
    pub fn set_family(&mut self, index: usize) {
        info!("change scale family index: {}", index);
        self.family_index = index % FAMILIES.len();
        self.rotation = 0;
        self.rebuild();
    }

    pub fn change_family(&mut self, delta: i32) {
        debug!("change scale family: {}", delta);
        let len = FAMILIES.len() as i32;
        self.family_index = (self.family_index as i32 + delta).rem_euclid(len) as usize;
        self.rotation = 0;
        self.rebuild();
    }

    pub fn rotate(&mut self, delta: i32) {
        debug!("rotate scale family: {}", delta);
        let len = FAMILIES[self.family_index].len() as i32;
        self.rotation = (self.rotation as i32 + delta).rem_euclid(len) as usize;
        self.rebuild();
    }

    pub fn set_rotation(&mut self, rotation: usize) {
        self.rotation = rotation % FAMILIES[self.family_index].len();
        self.rebuild();
    }

    /// Moves the start pitch by `delta`, clamped to the playable range.
    pub fn change_base_pitch(&mut self, delta: i32) {
        self.set_base_pitch(self.start_pitch + delta);
    }

    pub fn set_base_pitch(&mut self, pitch: Pitch) {
        self.start_pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        self.rebuild();
    }

    /// Puts the tonic on the given pitch class in the base octave.
    pub fn set_base_pitch_class(&mut self, index: i32) {
        self.set_base_pitch(self.base_start + index.rem_euclid(SEMITONES_PER_OCTAVE));
    }

    /// Moves the tonic up one degree and rotates to match, folding back an
    /// octave once the tonic climbs a full octave above the base.
    pub fn next_start(&mut self) {
        let step = self.family.get(1).copied().unwrap_or(0);
        self.start_pitch = (self.start_pitch + step).clamp(MIN_PITCH, MAX_PITCH);
        let len = FAMILIES[self.family_index].len();
        self.rotation = (self.rotation + 1) % len;
        if self.start_pitch - self.base_start >= SEMITONES_PER_OCTAVE {
            self.start_pitch -= SEMITONES_PER_OCTAVE;
        }
        self.rebuild();
    }

    pub fn on_change(&mut self, callback: impl FnMut(&Scale) + Send + 'static) -> Subscription {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.listeners.unsubscribe(subscription)
    }

    fn rebuild(&mut self) {
        self.family = notes::rotate_family(FAMILIES[self.family_index], self.rotation);
        let len = self.family.len();
        self.midi_scale = (0..self.note_count)
            .map(|i| {
                let octave = (i / len) as i32;
                self.family[i % len] + octave * SEMITONES_PER_OCTAVE + self.start_pitch
            })
            .collect();

        let mut listeners = mem::take(&mut self.listeners);
        listeners.emit(self);
        self.listeners = listeners;
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scale")
            .field("family", &notes::family_name(self.family_index))
            .field("rotation", &self.rotation)
            .field("start_pitch", &self.start_pitch)
            .finish()
    }
}
