//! An instrument turns "play scale index i" into live activations.
//!
//! It owns the activation player, hands each new activation a channel in
//! round-robin order and keeps track of which pitches sound on which
//! channel, so the synth outputs never see a duplicate note-on or a stray
//! note-off.
//!
//! Completion callbacks are queued while the player is locked and run once
//! it is released, so they may call back into the instrument.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{KeyedListeners, Listeners, Subscription};
use crate::notes::{Pitch, PitchClass};
use crate::output::{OutputSink, Program, SharedSink, SharedSynth};
use crate::scale::Scale;
use crate::sequencer::activation::{ActivationHandle, CancelMode, DEFAULT_MIN_HOLD};
use crate::sequencer::factories::{ActivationContext, ActivationKind};
use crate::sequencer::playback::{ClockConfig, TickSource, Unsubscribe};
use crate::sequencer::player::{ActivationPlayer, OnComplete};
use crate::timer::SharedTimer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteActive {
    pub pitch: Pitch,
    pub channel: u8,
    pub active: bool,
}

struct Channel {
    index: u8,
    /// Sounding pitches and how many activations hold each of them.
    active: BTreeMap<Pitch, usize>,
    program: Option<Program>,
    volume: f32,
}

struct Voices {
    channels: Vec<Channel>,
    outputs: Vec<SharedSynth>,
    pitch_listeners: KeyedListeners<Pitch, NoteActive>,
    class_listeners: KeyedListeners<PitchClass, NoteActive>,
    program_listeners: Listeners<Program>,
}

impl Voices {
    fn trigger(&mut self, channel: usize, pitch: Pitch, velocity: Option<f32>) {
        let Some(ch) = self.channels.get_mut(channel) else {
            return;
        };
        let holders = ch.active.entry(pitch).or_insert(0);
        *holders += 1;
        if *holders > 1 {
            return;
        }
        debug!("add note {} channel={}", pitch, ch.index);
        let index = ch.index;
        let velocity = velocity.unwrap_or(ch.volume);
        for output in &self.outputs {
            output.lock().note_on(index, pitch, velocity);
        }
        self.notify(pitch, index, true);
    }

    fn untrigger(&mut self, channel: usize, pitch: Pitch) {
        let Some(ch) = self.channels.get_mut(channel) else {
            return;
        };
        let Some(holders) = ch.active.get_mut(&pitch) else {
            return;
        };
        *holders -= 1;
        if *holders > 0 {
            return;
        }
        ch.active.remove(&pitch);
        debug!("remove note {} channel={}", pitch, ch.index);
        let index = ch.index;
        for output in &self.outputs {
            output.lock().note_off(index, pitch);
        }
        self.notify(pitch, index, false);
    }

    fn notify(&mut self, pitch: Pitch, channel: u8, active: bool) {
        let event = NoteActive {
            pitch,
            channel,
            active,
        };
        self.class_listeners.emit(&PitchClass::of(pitch), &event);
        self.pitch_listeners.emit(&pitch, &event);
    }
}

/// The sink an activation sees: one channel of the instrument. It only
/// releases pitches it started itself, so a late stop from one activation
/// never silences another holding the same pitch.
struct ChannelSink {
    channel: usize,
    voices: Arc<Mutex<Voices>>,
    holding: HashSet<Pitch>,
}

impl OutputSink for ChannelSink {
    fn start(&mut self, pitch: Pitch, velocity: Option<f32>) {
        if self.holding.insert(pitch) {
            self.voices.lock().trigger(self.channel, pitch, velocity);
        }
    }

    fn stop(&mut self, pitch: Pitch) {
        if self.holding.remove(&pitch) {
            self.voices.lock().untrigger(self.channel, pitch);
        }
    }
}

type Completions = Arc<Mutex<Vec<OnComplete>>>;

fn run_completions(completions: &Mutex<Vec<OnComplete>>) {
    let done = mem::take(&mut *completions.lock());
    for on_complete in done {
        on_complete();
    }
}

pub struct TriggerOptions {
    pub activation: ActivationKind,
    /// How the returned [`Cancel`] stops the activation.
    pub cancel: CancelMode,
    pub on_complete: Option<OnComplete>,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            activation: ActivationKind::SingleNote,
            cancel: CancelMode::Loop,
            on_complete: None,
        }
    }
}

/// Stops one triggered activation, e.g. on key release.
#[derive(Debug, Clone)]
pub struct Cancel {
    handle: ActivationHandle,
    mode: CancelMode,
}

impl Cancel {
    pub fn cancel(&self) {
        self.handle.cancel(self.mode);
    }

    pub fn mode(&self) -> CancelMode {
        self.mode
    }

    pub fn handle(&self) -> &ActivationHandle {
        &self.handle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentSubscription {
    Pitch(Subscription),
    Class(Subscription),
    Program(Subscription),
}

pub struct Instrument {
    name: String,
    scale: Arc<Mutex<Scale>>,
    clock: ClockConfig,
    timer: SharedTimer,
    player: Arc<Mutex<ActivationPlayer>>,
    completions: Completions,
    voices: Arc<Mutex<Voices>>,
    next_channel: usize,
    note_offset: i64,
    min_hold: Duration,
    tick: Option<Unsubscribe>,
}

impl Instrument {
    pub fn new(
        name: impl Into<String>,
        channels: &[u8],
        scale: Arc<Mutex<Scale>>,
        clock: ClockConfig,
        timer: SharedTimer,
    ) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::NoChannels);
        }
        let channels = channels
            .iter()
            .map(|&index| Channel {
                index,
                active: BTreeMap::new(),
                program: None,
                volume: 1.0,
            })
            .collect();
        Ok(Self {
            name: name.into(),
            scale,
            clock,
            timer,
            player: Arc::new(Mutex::new(ActivationPlayer::default())),
            completions: Arc::new(Mutex::new(Vec::new())),
            voices: Arc::new(Mutex::new(Voices {
                channels,
                outputs: Vec::new(),
                pitch_listeners: KeyedListeners::new(),
                class_listeners: KeyedListeners::new(),
                program_listeners: Listeners::new(),
            })),
            next_channel: 0,
            note_offset: 0,
            min_hold: DEFAULT_MIN_HOLD,
            tick: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> &Arc<Mutex<Scale>> {
        &self.scale
    }

    pub fn clock(&self) -> &ClockConfig {
        &self.clock
    }

    pub fn add_output(&self, output: SharedSynth) {
        self.voices.lock().outputs.push(output);
    }

    /// Steps the player on every tick of `source`.
    pub fn attach(&mut self, source: &impl TickSource) {
        self.detach();
        let player = Arc::clone(&self.player);
        let completions = Arc::clone(&self.completions);
        self.tick = Some(source.on_tick(Box::new(move || {
            player.lock().step();
            run_completions(&completions);
        })));
    }

    pub fn detach(&mut self) {
        if let Some(tick) = self.tick.take() {
            tick.unsubscribe();
        }
    }

    /// Steps the player once, outside any clock.
    pub fn step(&self) {
        self.player.lock().step();
        run_completions(&self.completions);
    }

    pub fn set_min_hold(&mut self, min_hold: Duration) {
        self.min_hold = min_hold;
    }

    pub fn note_offset(&self) -> i64 {
        self.note_offset
    }

    /// Raises or lowers where index 0 lands on the scale.
    pub fn set_note_offset(&mut self, offset: i64) {
        info!("{}: setting note offset to {}", self.name, offset);
        self.note_offset = offset;
    }

    pub fn midi_note_at_index(&self, index: i64) -> Option<Pitch> {
        let index = usize::try_from(index + self.note_offset).ok()?;
        self.scale.lock().pitch_at(index)
    }

    pub fn trigger_note_index(&mut self, index: i64, options: TriggerOptions) -> Result<Cancel> {
        let pitch = self
            .midi_note_at_index(index)
            .ok_or(Error::ScaleIndexOutOfRange {
                index: index + self.note_offset,
            })?;

        let channel_count = self.voices.lock().channels.len();
        let channel = (self.next_channel + 1) % channel_count;
        let sink: SharedSink = Arc::new(Mutex::new(ChannelSink {
            channel,
            voices: Arc::clone(&self.voices),
            holding: HashSet::new(),
        }));

        let handle = {
            let scale = self.scale.lock();
            let mut ctx = ActivationContext::new(
                scale.midi_scale(),
                &self.clock,
                pitch,
                sink,
                Arc::clone(&self.timer),
            );
            ctx.min_hold = self.min_hold;
            options.activation.build(&ctx)?
        };
        self.next_channel = channel;
        debug!(
            "{}: trigger index {} pitch {} as {}",
            self.name,
            index,
            pitch,
            options.activation.label()
        );

        let on_complete = options.on_complete.map(|on_complete| {
            let completions = Arc::clone(&self.completions);
            Box::new(move || completions.lock().push(on_complete)) as OnComplete
        });
        self.player.lock().add_activation(handle.clone(), on_complete);
        run_completions(&self.completions);
        Ok(Cancel {
            handle,
            mode: options.cancel,
        })
    }

    pub fn max_active(&self) -> Option<usize> {
        self.player.lock().max_activations()
    }

    pub fn set_max_active(&self, max_active: Option<usize>) {
        self.player.lock().set_max_activations(max_active);
        run_completions(&self.completions);
    }

    pub fn clear_all(&self) {
        self.player.lock().clear_all();
        run_completions(&self.completions);
    }

    pub fn live_activations(&self) -> usize {
        self.player.lock().len()
    }

    /// Sets every channel to `program` and tells every output.
    pub fn set_program(&self, program: Program) {
        info!(
            "{}: set program {} bank={} program={}",
            self.name,
            program.name.as_deref().unwrap_or(""),
            program.bank,
            program.program
        );
        let mut voices = self.voices.lock();
        for channel in voices.channels.iter_mut() {
            channel.program = Some(program.clone());
        }
        voices.program_listeners.emit(&program);
        for output in &voices.outputs {
            let mut output = output.lock();
            for channel in &voices.channels {
                output.set_program(channel.index, &program);
            }
        }
    }

    pub fn program(&self) -> Option<Program> {
        self.voices
            .lock()
            .channels
            .first()
            .and_then(|c| c.program.clone())
    }

    /// Volume for notes without their own velocity, clamped to 0..=1.
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        for channel in self.voices.lock().channels.iter_mut() {
            channel.volume = volume;
        }
    }

    /// Sounding pitches across all channels.
    pub fn active_pitches(&self) -> BTreeSet<Pitch> {
        self.voices
            .lock()
            .channels
            .iter()
            .flat_map(|c| c.active.keys().copied())
            .collect()
    }

    pub fn is_pitch_active(&self, pitch: Pitch) -> bool {
        self.voices
            .lock()
            .channels
            .iter()
            .any(|c| c.active.contains_key(&pitch))
    }

    /// Listeners run with the instrument's voice state locked and must not
    /// call back into the instrument.
    pub fn on_pitch_active(
        &self,
        pitch: Pitch,
        callback: impl FnMut(&NoteActive) + Send + 'static,
    ) -> InstrumentSubscription {
        InstrumentSubscription::Pitch(self.voices.lock().pitch_listeners.subscribe(pitch, callback))
    }

    /// Like [`Instrument::on_pitch_active`], for any octave of `class`.
    pub fn on_class_active(
        &self,
        class: PitchClass,
        callback: impl FnMut(&NoteActive) + Send + 'static,
    ) -> InstrumentSubscription {
        InstrumentSubscription::Class(self.voices.lock().class_listeners.subscribe(class, callback))
    }

    pub fn on_program(
        &self,
        callback: impl FnMut(&Program) + Send + 'static,
    ) -> InstrumentSubscription {
        InstrumentSubscription::Program(self.voices.lock().program_listeners.subscribe(callback))
    }

    pub fn unsubscribe(&self, subscription: InstrumentSubscription) -> bool {
        let mut voices = self.voices.lock();
        match subscription {
            InstrumentSubscription::Pitch(s) => voices.pitch_listeners.unsubscribe(s),
            InstrumentSubscription::Class(s) => voices.class_listeners.unsubscribe(s),
            InstrumentSubscription::Program(s) => voices.program_listeners.unsubscribe(s),
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{RecordingSynth, SynthEvent};
    use crate::timer::ManualTimer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instrument(channels: &[u8]) -> (Instrument, Arc<Mutex<RecordingSynth>>, Arc<ManualTimer>) {
        let timer = ManualTimer::shared();
        let instrument = Instrument::new(
            "test",
            channels,
            Arc::new(Mutex::new(Scale::new())),
            ClockConfig::default(),
            timer.clone(),
        )
        .unwrap();
        let synth = Arc::new(Mutex::new(RecordingSynth::new()));
        instrument.add_output(synth.clone());
        (instrument, synth, timer)
    }

    #[test]
    fn test_no_channels_is_an_error() {
        let result = Instrument::new(
            "empty",
            &[],
            Arc::new(Mutex::new(Scale::new())),
            ClockConfig::default(),
            ManualTimer::shared(),
        );
        assert!(matches!(result, Err(Error::NoChannels)));
    }

    #[test]
    fn test_trigger_resolves_index_through_scale_and_offset() {
        let (mut instrument, synth, timer) = instrument(&[0]);
        instrument.set_note_offset(2);
        let cancel = instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        assert_eq!(
            synth.lock().events(),
            &[SynthEvent::NoteOn {
                channel: 0,
                pitch: 40,
                velocity: 1.0
            }]
        );
        assert!(instrument.is_pitch_active(40));

        timer.advance(Duration::from_millis(400));
        cancel.cancel();
        assert!(!instrument.is_pitch_active(40));
        instrument.step();
        assert_eq!(instrument.live_activations(), 0);
    }

    #[test]
    fn test_channels_round_robin() {
        let (mut instrument, synth, _timer) = instrument(&[3, 4]);
        instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        instrument
            .trigger_note_index(1, TriggerOptions::default())
            .unwrap();
        instrument
            .trigger_note_index(2, TriggerOptions::default())
            .unwrap();
        let channels: Vec<u8> = synth
            .lock()
            .events()
            .iter()
            .filter_map(|e| match e {
                SynthEvent::NoteOn { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![4, 3, 4]);
    }

    #[test]
    fn test_same_pitch_on_same_channel_is_deduplicated() {
        let (mut instrument, synth, _timer) = instrument(&[0]);
        instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        assert_eq!(synth.lock().events().len(), 1);
    }

    #[test]
    fn test_deferred_stop_keeps_repressed_note() {
        let (mut instrument, synth, timer) = instrument(&[0]);
        let tap = instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        timer.advance(Duration::from_millis(10));
        tap.cancel();

        timer.advance(Duration::from_millis(90));
        let held = instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();

        // the tap's minimum hold runs out while the second press still holds
        timer.advance(Duration::from_millis(200));
        assert!(instrument.is_pitch_active(36));
        assert_eq!(synth.lock().events().len(), 1);

        timer.advance(Duration::from_millis(200));
        held.cancel();
        assert!(!instrument.is_pitch_active(36));
        assert_eq!(
            synth.lock().events(),
            &[
                SynthEvent::NoteOn {
                    channel: 0,
                    pitch: 36,
                    velocity: 1.0
                },
                SynthEvent::NoteOff {
                    channel: 0,
                    pitch: 36
                },
            ]
        );
    }

    #[test]
    fn test_failed_build_keeps_channel_order() {
        let (mut instrument, synth, _timer) = instrument(&[3, 4]);
        // a glissando from the lowest note runs below the scale
        assert!(instrument
            .trigger_note_index(
                0,
                TriggerOptions {
                    activation: ActivationKind::Glissando,
                    ..TriggerOptions::default()
                },
            )
            .is_err());
        assert_eq!(instrument.live_activations(), 0);

        instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        assert!(matches!(
            synth.lock().events(),
            [SynthEvent::NoteOn { channel: 4, .. }]
        ));
    }

    #[test]
    fn test_out_of_range_index() {
        let (mut instrument, _synth, _timer) = instrument(&[0]);
        assert!(matches!(
            instrument.trigger_note_index(-1, TriggerOptions::default()),
            Err(Error::ScaleIndexOutOfRange { index: -1 })
        ));
    }

    #[test]
    fn test_note_listeners() {
        let (mut instrument, _synth, timer) = instrument(&[0]);
        let by_pitch = Arc::new(Mutex::new(Vec::new()));
        let by_class = Arc::new(AtomicUsize::new(0));
        let pitch_sub = {
            let by_pitch = by_pitch.clone();
            instrument.on_pitch_active(36, move |e| by_pitch.lock().push(e.active))
        };
        {
            let by_class = by_class.clone();
            instrument.on_class_active(PitchClass::C, move |_| {
                by_class.fetch_add(1, Ordering::SeqCst);
            });
        }

        // index 7 is 48, another C
        let low = instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        instrument
            .trigger_note_index(7, TriggerOptions::default())
            .unwrap();
        timer.advance(Duration::from_secs(1));
        low.cancel();

        assert_eq!(*by_pitch.lock(), vec![true, false]);
        assert_eq!(by_class.load(Ordering::SeqCst), 3);
        assert!(instrument.unsubscribe(pitch_sub));
        assert!(!instrument.unsubscribe(pitch_sub));
    }

    #[test]
    fn test_set_program_fans_out() {
        let (instrument, synth, _timer) = instrument(&[1, 2]);
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            instrument.on_program(move |p| *seen.lock() = Some(p.clone()));
        }
        instrument.set_program(Program::new(0, 42));
        assert_eq!(synth.lock().events().len(), 2);
        assert_eq!(instrument.program(), Some(Program::new(0, 42)));
        assert_eq!(*seen.lock(), Some(Program::new(0, 42)));
    }

    #[test]
    fn test_volume_is_default_velocity() {
        let (mut instrument, synth, _timer) = instrument(&[0]);
        instrument.set_volume(2.0);
        instrument.set_volume(0.25);
        instrument
            .trigger_note_index(0, TriggerOptions::default())
            .unwrap();
        assert!(matches!(
            synth.lock().events()[0],
            SynthEvent::NoteOn { velocity, .. } if velocity == 0.25
        ));
    }

    #[test]
    fn test_max_active_steals_oldest() {
        let (mut instrument, _synth, timer) = instrument(&[0]);
        instrument.set_max_active(Some(2));
        let completed = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let completed = completed.clone();
            instrument
                .trigger_note_index(
                    i,
                    TriggerOptions {
                        on_complete: Some(Box::new(move || {
                            completed.fetch_add(1, Ordering::SeqCst);
                        })),
                        ..TriggerOptions::default()
                    },
                )
                .unwrap();
        }
        assert_eq!(instrument.live_activations(), 2);
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        // the stolen note was only just started, so it still sounds
        assert!(instrument.is_pitch_active(36));
        timer.advance(Duration::from_millis(300));
        assert!(!instrument.is_pitch_active(36));
        assert_eq!(
            instrument.active_pitches().into_iter().collect::<Vec<_>>(),
            vec![38, 40]
        );
    }
}
