use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gridtone::{Instrument, MidiOutputDevice, Settings, ThreadTimer};

#[derive(Parser)]
#[command(name = "gridtone")]
#[command(about = "Scale-locked grid instrument", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,

    /// MIDI output port name or part of it, overrides the settings file
    #[arg(short, long)]
    port: Option<String>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_ports {
        for (i, name) in MidiOutputDevice::available_ports().iter().enumerate() {
            println!("{}: {}", i, name);
        }
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(port) = cli.port {
        settings.midi.port = Some(port);
    }

    run(settings)
}

/// The instrument plus the MIDI device it always plays into. A device that
/// is not connected drops everything it is sent.
fn build_instrument(settings: &Settings) -> Result<(Instrument, Arc<Mutex<MidiOutputDevice>>)> {
    let scale = Arc::new(Mutex::new(settings.scale.build()));
    let mut instrument = Instrument::new(
        "grid",
        &settings.instrument.channels,
        scale,
        settings.clock,
        ThreadTimer::shared(),
    )?;
    instrument.set_min_hold(settings.instrument.min_hold());
    instrument.set_max_active(settings.instrument.max_active);

    let midi = Arc::new(Mutex::new(MidiOutputDevice::new()));
    if let Some(port) = &settings.midi.port {
        if let Err(e) = midi.lock().connect_named(port) {
            warn!("{}", e);
        }
    }
    instrument.add_output(midi.clone());
    Ok((instrument, midi))
}

#[cfg(not(feature = "gui"))]
mod headless {
    use std::thread;

    use gridtone::output::SynthOutput;
    use gridtone::{midi_note_name, Clock, Pitch, Program};
    use tracing::info;

    pub struct LogSynth;

    impl SynthOutput for LogSynth {
        fn note_on(&mut self, channel: u8, pitch: Pitch, velocity: f32) {
            info!("on  {:>4} ch{} vel {:.2}", name(pitch), channel, velocity);
        }

        fn note_off(&mut self, channel: u8, pitch: Pitch) {
            info!("off {:>4} ch{}", name(pitch), channel);
        }

        fn set_program(&mut self, channel: u8, program: &Program) {
            info!("program {} bank {} ch{}", program.program, program.bank, channel);
        }
    }

    fn name(pitch: Pitch) -> String {
        u8::try_from(pitch)
            .map(midi_note_name)
            .unwrap_or_else(|_| pitch.to_string())
    }

    /// Sleeps through one measure of `clock`.
    pub fn wait_measure(clock: &Clock) {
        let config = clock.config();
        thread::sleep(config.tick_duration() * config.ticks_per_measure);
    }
}

#[cfg(not(feature = "gui"))]
fn run(settings: Settings) -> Result<()> {
    use gridtone::{Clock, TriggerOptions};
    use tracing::info;

    info!("no gui, playing one measure of {}", settings.instrument.activation.label());
    let (mut instrument, _midi) = build_instrument(&settings)?;
    instrument.add_output(Arc::new(Mutex::new(headless::LogSynth)));

    let mut clock = Clock::new(settings.clock)?;
    instrument.attach(&clock);
    let cancel = instrument.trigger_note_index(
        0,
        TriggerOptions {
            activation: settings.instrument.activation,
            cancel: settings.instrument.cancel_mode(),
            on_complete: Some(Box::new(|| info!("activation complete"))),
        },
    )?;
    clock.start()?;
    headless::wait_measure(&clock);
    cancel.cancel();
    headless::wait_measure(&clock);
    instrument.clear_all();
    clock.stop();
    Ok(())
}

#[cfg(feature = "gui")]
fn run(settings: Settings) -> Result<()> {
    use eframe::egui;

    let app = gui::GridApp::new(settings)?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([820.0, 760.0])
            .with_title("gridtone"),
        ..Default::default()
    };

    eframe::run_native(
        "gridtone",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))
}

#[cfg(feature = "gui")]
mod gui {
    use std::collections::HashMap;
    use std::sync::Arc;

    use anyhow::Result;
    use eframe::egui;
    use parking_lot::Mutex;

    use gridtone::notes::{family_name, FAMILIES};
    use gridtone::{
        midi_note_name, ActivationKind, Cancel, Clock, Instrument, MidiOutputDevice, Pitch,
        PitchClass, Settings, TriggerOptions,
    };

    const GRID_SIZE: usize = 8;
    /// Moving up one row moves up this many scale degrees.
    const ROW_STEP: usize = 3;

    pub struct GridApp {
        instrument: Instrument,
        clock: Clock,
        midi_output: Arc<Mutex<MidiOutputDevice>>,
        activation: ActivationKind,
        sustain: bool,

        // UI state
        available_midi_ports: Vec<String>,
        selected_port: Option<usize>,
        held: HashMap<usize, Cancel>,
        last_error: Option<String>,
    }

    impl GridApp {
        pub fn new(settings: Settings) -> Result<Self> {
            let (mut instrument, midi_output) = super::build_instrument(&settings)?;
            let mut clock = Clock::new(settings.clock)?;
            instrument.attach(&clock);
            clock.start()?;

            let available_midi_ports = MidiOutputDevice::available_ports();
            let selected_port = midi_output
                .lock()
                .port_name()
                .and_then(|name| available_midi_ports.iter().position(|p| p == name));

            Ok(Self {
                instrument,
                clock,
                midi_output,
                activation: settings.instrument.activation,
                sustain: settings.instrument.sustain,
                available_midi_ports,
                selected_port,
                held: HashMap::new(),
                last_error: None,
            })
        }

        fn press(&mut self, index: usize) {
            let options = TriggerOptions {
                activation: self.activation,
                cancel: if self.sustain {
                    gridtone::CancelMode::Immediate
                } else {
                    gridtone::CancelMode::Loop
                },
                on_complete: None,
            };
            match self.instrument.trigger_note_index(index as i64, options) {
                Ok(cancel) => {
                    self.held.insert(index, cancel);
                    self.last_error = None;
                }
                Err(e) => self.last_error = Some(e.to_string()),
            }
        }

        fn release(&mut self, index: usize) {
            if let Some(cancel) = self.held.remove(&index) {
                cancel.cancel();
            }
        }

        fn release_all(&mut self) {
            for (_, cancel) in self.held.drain() {
                cancel.cancel();
            }
            self.instrument.clear_all();
        }

        fn controls(&mut self, ui: &mut egui::Ui) {
            let scale = self.instrument.scale().clone();

            ui.horizontal(|ui| {
                ui.label("Scale:");
                let family = scale.lock().family_index();
                egui::ComboBox::from_id_source("family")
                    .selected_text(family_name(family))
                    .show_ui(ui, |ui| {
                        for i in 0..FAMILIES.len() {
                            if ui.selectable_label(family == i, family_name(i)).clicked() {
                                scale.lock().set_family(i);
                            }
                        }
                    });

                ui.add_space(10.0);
                ui.label("Mode:");
                if ui.button("◀").clicked() {
                    scale.lock().rotate(-1);
                }
                ui.label(format!("{}", scale.lock().rotation() + 1));
                if ui.button("▶").clicked() {
                    scale.lock().rotate(1);
                }

                ui.add_space(10.0);
                ui.label("Tonic:");
                let tonic = PitchClass::of(scale.lock().start_pitch());
                egui::ComboBox::from_id_source("tonic")
                    .selected_text(tonic.name())
                    .show_ui(ui, |ui| {
                        for (i, class) in PitchClass::ALL.iter().enumerate() {
                            if ui.selectable_label(tonic == *class, class.name()).clicked() {
                                scale.lock().set_base_pitch_class(i as i32);
                            }
                        }
                    });
                if ui.button("Next").clicked() {
                    scale.lock().next_start();
                }
            });

            ui.horizontal(|ui| {
                ui.label("Pattern:");
                egui::ComboBox::from_id_source("activation")
                    .selected_text(self.activation.label())
                    .show_ui(ui, |ui| {
                        for kind in ActivationKind::ALL {
                            ui.selectable_value(&mut self.activation, kind, kind.label());
                        }
                    });
                if let ActivationKind::Arpeggio { offset } = &mut self.activation {
                    ui.add(egui::DragValue::new(offset).range(-7..=7).prefix("offset "));
                }

                ui.checkbox(&mut self.sustain, "Sustain");

                ui.add_space(10.0);
                ui.label("Voices:");
                let mut voices = self.instrument.max_active().unwrap_or(0);
                if ui
                    .add(egui::Slider::new(&mut voices, 0..=16).text("(0 = unlimited)"))
                    .changed()
                {
                    self.instrument
                        .set_max_active(if voices == 0 { None } else { Some(voices) });
                }

                let mut offset = self.instrument.note_offset();
                ui.label("Offset:");
                if ui.add(egui::DragValue::new(&mut offset).range(0..=64)).changed() {
                    self.instrument.set_note_offset(offset);
                }
            });

            // MIDI Port Selection
            let mut selected_port_changed = None;
            ui.horizontal(|ui| {
                ui.label("MIDI Output:");
                if self.available_midi_ports.is_empty() {
                    ui.label("No MIDI ports available");
                } else {
                    egui::ComboBox::from_id_source("midi_port")
                        .selected_text(
                            self.selected_port
                                .and_then(|i| self.available_midi_ports.get(i))
                                .map(String::as_str)
                                .unwrap_or("Select port..."),
                        )
                        .show_ui(ui, |ui| {
                            for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                                if ui
                                    .selectable_label(self.selected_port == Some(i), port_name)
                                    .clicked()
                                {
                                    selected_port_changed = Some(i);
                                }
                            }
                        });
                }
                if ui.button("Stop all").clicked() {
                    self.release_all();
                }
            });

            if let Some(port_idx) = selected_port_changed {
                match self.midi_output.lock().connect(port_idx) {
                    Ok(()) => self.selected_port = Some(port_idx),
                    Err(e) => self.last_error = Some(e.to_string()),
                }
            }
        }

        fn grid(&mut self, ui: &mut egui::Ui) {
            let sounding = self.instrument.active_pitches();
            let mut pressed = Vec::new();
            let mut released = Vec::new();

            for row in (0..GRID_SIZE).rev() {
                ui.horizontal(|ui| {
                    for col in 0..GRID_SIZE {
                        let index = row * ROW_STEP + col;
                        let Some(pitch) = self.instrument.midi_note_at_index(index as i64) else {
                            continue;
                        };
                        let button = egui::Button::new(label(pitch))
                            .min_size(egui::vec2(80.0, 60.0))
                            .fill(colour(pitch, sounding.contains(&pitch)));

                        let down = ui.add(button).is_pointer_button_down_on();
                        let held = self.held.contains_key(&index);
                        if down && !held {
                            pressed.push(index);
                        } else if !down && held {
                            released.push(index);
                        }
                    }
                });
            }

            for index in released {
                self.release(index);
            }
            for index in pressed {
                self.press(index);
            }
        }
    }

    fn label(pitch: Pitch) -> String {
        u8::try_from(pitch)
            .map(midi_note_name)
            .unwrap_or_else(|_| pitch.to_string())
    }

    fn colour(pitch: Pitch, sounding: bool) -> egui::Color32 {
        let hue = PitchClass::of(pitch) as u8 as f32 / 12.0;
        let value = if sounding { 0.95 } else { 0.4 };
        egui::ecolor::Hsva::new(hue, 0.7, value, 1.0).into()
    }

    impl eframe::App for GridApp {
        fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
            ctx.request_repaint();

            egui::CentralPanel::default().show(ctx, |ui| {
                ui.heading("gridtone");
                ui.add_space(10.0);

                self.controls(ui);
                ui.add_space(20.0);
                self.grid(ui);

                // Info
                ui.separator();
                ui.label(format!(
                    "{} live activations, {} ticks",
                    self.instrument.live_activations(),
                    self.clock.tick_count()
                ));
                if let Some(error) = &self.last_error {
                    ui.colored_label(egui::Color32::LIGHT_RED, error);
                }
                if !self.midi_output.lock().is_connected() {
                    ui.colored_label(
                        egui::Color32::YELLOW,
                        "⚠ No MIDI output connected - nothing will sound",
                    );
                }
            });
        }

    }

    impl Drop for GridApp {
        fn drop(&mut self) {
            self.release_all();
        }
    }
}
