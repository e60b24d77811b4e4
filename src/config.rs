//! Settings file for the grid instrument.
//!
//! Every section and field is optional; a missing file section falls back to
//! the same defaults the engine uses on its own.
//!
//! ```toml
//! [clock]
//! millis_per_tick = 100
//!
//! [scale]
//! family = 2
//! rotation = 1
//!
//! [instrument]
//! channels = [0, 1]
//! max_active = 4
//! activation = { kind = "arpeggio", offset = 0 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;

use crate::error::{ConfigParseSnafu, ConfigReadSnafu, Result};
use crate::notes::Pitch;
use crate::scale::{Scale, DEFAULT_BASE_PITCH};
use crate::sequencer::activation::{CancelMode, DEFAULT_MIN_HOLD};
use crate::sequencer::factories::ActivationKind;
use crate::sequencer::playback::ClockConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub clock: ClockConfig,
    pub scale: ScaleSettings,
    pub instrument: InstrumentSettings,
    pub midi: MidiSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSettings {
    /// Index into the mode families, wrapped.
    pub family: usize,
    pub rotation: i32,
    pub base_pitch: Pitch,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            family: 0,
            rotation: 0,
            base_pitch: DEFAULT_BASE_PITCH,
        }
    }
}

impl ScaleSettings {
    pub fn build(&self) -> Scale {
        Scale::with_settings(self.family, self.rotation, self.base_pitch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    pub channels: Vec<u8>,
    /// Unbounded when absent.
    pub max_active: Option<usize>,
    pub min_hold_ms: u64,
    pub activation: ActivationKind,
    /// Release stops notes at once instead of letting the loop finish.
    pub sustain: bool,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            channels: vec![0],
            max_active: None,
            min_hold_ms: DEFAULT_MIN_HOLD.as_millis() as u64,
            activation: ActivationKind::default(),
            sustain: false,
        }
    }
}

impl InstrumentSettings {
    pub fn min_hold(&self) -> Duration {
        Duration::from_millis(self.min_hold_ms)
    }

    pub fn cancel_mode(&self) -> CancelMode {
        if self.sustain {
            CancelMode::Immediate
        } else {
            CancelMode::Loop
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Case-insensitive substring of the output port name.
    pub port: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
        let settings = Self::parse(&content).context(ConfigParseSnafu { path })?;
        settings.clock.validate()?;
        debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
