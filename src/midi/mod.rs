//! MIDI output using midir

use midir::{MidiOutput, MidiOutputConnection};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::notes::Pitch;
use crate::output::{Program, SynthOutput};

const CLIENT_NAME: &str = "gridtone MIDI Output";

const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
/// Bank select LSB is not sent; banks above 127 are not addressable.
const BANK_SELECT_MSB: u8 = 0x00;

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| Error::MidiInit {
            message: e.to_string(),
        })?;

        let ports = midi_out.ports();
        let port = ports.get(port_index).ok_or_else(|| Error::MidiPortNotFound {
            port: format!("#{}", port_index),
        })?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "gridtone")
            .map_err(|e| Error::MidiConnect {
                message: e.to_string(),
            })?;

        info!("connected to MIDI port {}", name);
        self.connection = Some(connection);
        self.port_name = Some(name);
        Ok(())
    }

    /// Connects to the first port whose name contains `pattern`, ignoring case.
    pub fn connect_named(&mut self, pattern: &str) -> Result<()> {
        let needle = pattern.to_lowercase();
        let index = Self::available_ports()
            .iter()
            .position(|name| name.to_lowercase().contains(&needle))
            .ok_or_else(|| Error::MidiPortNotFound {
                port: pattern.to_string(),
            })?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.send(&[NOTE_ON | (channel & 0x0F), note, velocity])
    }

    /// Sent as a note-on with velocity 0, which every synth treats as off.
    pub fn send_note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        self.send(&[NOTE_ON | (channel & 0x0F), note, 0])
    }

    pub fn send_program(&mut self, channel: u8, program: &Program) -> Result<()> {
        let channel = channel & 0x0F;
        self.send(&[PROGRAM_CHANGE | channel, program.program & 0x7F])?;
        self.send(&[CONTROL_CHANGE | channel, BANK_SELECT_MSB, program.bank & 0x7F])
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.port_name = None;
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        if let Some(ref mut conn) = self.connection {
            conn.send(message).map_err(|e| Error::MidiSend {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Notes outside 0..=127 are dropped, a send failure is logged and skipped.
impl SynthOutput for MidiOutputDevice {
    fn note_on(&mut self, channel: u8, pitch: Pitch, velocity: f32) {
        let Some(note) = to_midi_note(pitch) else {
            return;
        };
        if let Err(e) = self.send_note_on(channel, note, to_midi_velocity(velocity)) {
            warn!("note on {} failed: {}", pitch, e);
        }
    }

    fn note_off(&mut self, channel: u8, pitch: Pitch) {
        let Some(note) = to_midi_note(pitch) else {
            return;
        };
        if let Err(e) = self.send_note_off(channel, note) {
            warn!("note off {} failed: {}", pitch, e);
        }
    }

    fn set_program(&mut self, channel: u8, program: &Program) {
        if let Err(e) = self.send_program(channel, program) {
            warn!("program change on channel {} failed: {}", channel, e);
        }
    }
}

fn to_midi_note(pitch: Pitch) -> Option<u8> {
    u8::try_from(pitch).ok().filter(|n| *n < 128)
}

fn to_midi_velocity(velocity: f32) -> u8 {
    (velocity.clamp(0.0, 1.0) * 127.0).round() as u8
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
