//! Pitch classes and the interval families scales are built from.

use serde::{Deserialize, Serialize};

/// An absolute MIDI-style note number. Scales may run past 127; sinks
/// decide what to do with pitches they cannot express.
pub type Pitch = i32;

pub const SEMITONES_PER_OCTAVE: i32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    pub fn of(pitch: Pitch) -> Self {
        Self::ALL[pitch.rem_euclid(SEMITONES_PER_OCTAVE) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

pub const NATURAL_MAJOR: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
pub const MELODIC_MINOR: [i32; 7] = [0, 2, 3, 5, 7, 9, 11];
pub const HARMONIC_MAJOR: [i32; 7] = [0, 2, 4, 5, 7, 8, 11];
pub const HARMONIC_MINOR: [i32; 7] = [0, 2, 3, 5, 7, 8, 11];

/// The selectable families, in the order `Scale::set_family` indexes them.
pub const FAMILIES: [&[i32]; 4] = [
    &NATURAL_MAJOR,
    &MELODIC_MINOR,
    &HARMONIC_MAJOR,
    &HARMONIC_MINOR,
];

pub fn family_name(index: usize) -> &'static str {
    match index % FAMILIES.len() {
        0 => "natural major",
        1 => "melodic minor",
        2 => "harmonic major",
        _ => "harmonic minor",
    }
}

/// Re-anchor an ascending family on another of its degrees.
///
/// The entries from `rotation` on are shifted down so the new tonic is 0,
/// and the entries before it are lifted past the octave so the result keeps
/// ascending. Rotating natural major by 1 gives dorian, by 5 gives minor.
pub fn rotate_family(family: &[i32], rotation: usize) -> Vec<i32> {
    if family.is_empty() {
        return Vec::new();
    }
    let rotation = rotation % family.len();
    if rotation == 0 {
        return family.to_vec();
    }

    let (front, tail) = family.split_at(rotation);
    let mut rotated: Vec<i32> = tail.iter().map(|i| i - tail[0]).collect();
    let last_new = rotated[rotated.len() - 1];
    let incr = SEMITONES_PER_OCTAVE - family[family.len() - 1];
    rotated.extend(front.iter().map(|i| i + incr + last_new));
    rotated
}
