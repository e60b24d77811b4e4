use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use gridtone::output::{RecordingSynth, SynthEvent};
use gridtone::{
    ActivationKind, CancelMode, Clock, ClockConfig, Instrument, ManualTimer, Pitch, Scale,
    TriggerOptions,
};
use parking_lot::Mutex;

struct Rig {
    instrument: Instrument,
    clock: Clock,
    synth: Arc<Mutex<RecordingSynth>>,
    timer: Arc<ManualTimer>,
}

fn rig(channels: &[u8]) -> Rig {
    let timer = ManualTimer::shared();
    let clock = Clock::new(ClockConfig::default()).unwrap();
    let mut instrument = Instrument::new(
        "rig",
        channels,
        Arc::new(Mutex::new(Scale::new())),
        ClockConfig::default(),
        timer.clone(),
    )
    .unwrap();
    instrument.attach(&clock);
    let synth = Arc::new(Mutex::new(RecordingSynth::new()));
    instrument.add_output(synth.clone());
    Rig {
        instrument,
        clock,
        synth,
        timer,
    }
}

fn ticks(clock: &Clock, n: usize) {
    for _ in 0..n {
        clock.tick();
    }
}

fn note_ons(synth: &Mutex<RecordingSynth>) -> Vec<Pitch> {
    synth
        .lock()
        .events()
        .iter()
        .filter_map(|e| match e {
            SynthEvent::NoteOn { pitch, .. } => Some(*pitch),
            _ => None,
        })
        .collect()
}

fn note_offs(synth: &Mutex<RecordingSynth>) -> Vec<Pitch> {
    synth
        .lock()
        .events()
        .iter()
        .filter_map(|e| match e {
            SynthEvent::NoteOff { pitch, .. } => Some(*pitch),
            _ => None,
        })
        .collect()
}

#[test]
fn chord_loops_on_the_clock_until_released() {
    let mut rig = rig(&[0]);
    let completed = Arc::new(AtomicUsize::new(0));
    let cancel = {
        let completed = completed.clone();
        rig.instrument
            .trigger_note_index(
                0,
                TriggerOptions {
                    activation: ActivationKind::Chord,
                    cancel: CancelMode::Loop,
                    on_complete: Some(Box::new(move || {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })),
                },
            )
            .unwrap()
    };

    // nothing sounds before the first tick
    assert!(rig.synth.lock().events().is_empty());

    // chord for one beat, rest for one beat
    ticks(&rig.clock, 8);
    assert_eq!(note_ons(&rig.synth), vec![36, 40, 43]);
    ticks(&rig.clock, 1);
    assert_eq!(note_ons(&rig.synth).len(), 6);

    // released one tick into the second pass: the pass runs out, then the
    // draining step completes it
    cancel.cancel();
    ticks(&rig.clock, 7);
    assert_eq!(completed.load(Ordering::SeqCst), 0);
    ticks(&rig.clock, 1);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(rig.instrument.live_activations(), 0);
    assert!(rig.instrument.active_pitches().is_empty());
    assert_eq!(note_ons(&rig.synth).len(), 6);

    // a late release is harmless
    cancel.cancel();
    ticks(&rig.clock, 4);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn immediate_cancel_silences_at_once() {
    let mut rig = rig(&[0]);
    let cancel = rig
        .instrument
        .trigger_note_index(
            2,
            TriggerOptions {
                activation: ActivationKind::ContinuousChord,
                cancel: CancelMode::Immediate,
                on_complete: None,
            },
        )
        .unwrap();
    ticks(&rig.clock, 3);
    assert_eq!(note_ons(&rig.synth), vec![40, 43, 47]);

    cancel.cancel();
    cancel.cancel();
    let mut offs = note_offs(&rig.synth);
    offs.sort_unstable();
    assert_eq!(offs, vec![40, 43, 47]);
    ticks(&rig.clock, 1);
    assert_eq!(rig.instrument.live_activations(), 0);
}

#[test]
fn quick_tap_still_holds_for_minimum() {
    let mut rig = rig(&[0]);
    let cancel = rig
        .instrument
        .trigger_note_index(4, TriggerOptions::default())
        .unwrap();
    rig.timer.advance(Duration::from_millis(10));
    cancel.cancel();
    assert!(rig.instrument.is_pitch_active(43));

    rig.timer.advance(Duration::from_millis(289));
    assert!(rig.instrument.is_pitch_active(43));
    rig.timer.advance(Duration::from_millis(1));
    assert!(!rig.instrument.is_pitch_active(43));
    assert_eq!(note_offs(&rig.synth), vec![43]);
}

#[test]
fn voice_limit_steals_oldest_across_kinds() {
    let mut rig = rig(&[0, 1]);
    rig.instrument.set_max_active(Some(1));
    rig.instrument
        .trigger_note_index(
            0,
            TriggerOptions {
                activation: ActivationKind::ContinuousNote,
                ..TriggerOptions::default()
            },
        )
        .unwrap();
    ticks(&rig.clock, 2);
    assert!(rig.instrument.is_pitch_active(36));

    rig.instrument
        .trigger_note_index(7, TriggerOptions::default())
        .unwrap();
    assert!(!rig.instrument.is_pitch_active(36));
    assert!(rig.instrument.is_pitch_active(48));
    assert_eq!(rig.instrument.live_activations(), 1);
}

#[test]
fn scale_changes_apply_to_the_next_trigger() {
    let mut rig = rig(&[0]);
    rig.instrument.scale().lock().set_family(1);
    rig.instrument.scale().lock().set_base_pitch_class(2);
    // melodic minor on D: D E F G A B C#
    let pitches: Vec<Pitch> = (0..7)
        .filter_map(|i| rig.instrument.midi_note_at_index(i))
        .collect();
    assert_eq!(pitches, vec![38, 40, 41, 43, 45, 47, 49]);

    rig.instrument
        .trigger_note_index(2, TriggerOptions::default())
        .unwrap();
    assert_eq!(note_ons(&rig.synth), vec![41]);
}

#[test]
fn detach_stops_stepping() {
    let mut rig = rig(&[0]);
    rig.instrument
        .trigger_note_index(
            0,
            TriggerOptions {
                activation: ActivationKind::Chord,
                ..TriggerOptions::default()
            },
        )
        .unwrap();
    rig.instrument.detach();
    assert_eq!(rig.clock.listener_count(), 0);
    ticks(&rig.clock, 4);
    assert!(rig.synth.lock().events().is_empty());

    rig.instrument.attach(&rig.clock);
    rig.clock.tick();
    assert_eq!(note_ons(&rig.synth).len(), 3);
}

#[test]
fn repressed_note_outlives_an_earlier_tap() {
    let mut rig = rig(&[0]);
    let tap = rig
        .instrument
        .trigger_note_index(0, TriggerOptions::default())
        .unwrap();
    tap.cancel();
    rig.timer.advance(Duration::from_millis(50));
    let held = rig
        .instrument
        .trigger_note_index(0, TriggerOptions::default())
        .unwrap();
    rig.timer.advance(Duration::from_millis(300));
    ticks(&rig.clock, 2);

    assert!(rig.instrument.is_pitch_active(36));
    assert!(note_offs(&rig.synth).is_empty());
    held.cancel();
    assert_eq!(note_offs(&rig.synth), vec![36]);
}

#[test]
fn completion_callback_can_retrigger_the_instrument() {
    let clock = Arc::new(Clock::new(ClockConfig::default()).unwrap());
    let mut instrument = Instrument::new(
        "rig",
        &[0],
        Arc::new(Mutex::new(Scale::new())),
        ClockConfig::default(),
        ManualTimer::shared(),
    )
    .unwrap();
    instrument.attach(&*clock);
    let synth = Arc::new(Mutex::new(RecordingSynth::new()));
    instrument.add_output(synth.clone());
    let instrument = Arc::new(Mutex::new(instrument));

    let live_after_retrigger = Arc::new(Mutex::new(None));
    let cancel = {
        let again = instrument.clone();
        let live = live_after_retrigger.clone();
        instrument
            .lock()
            .trigger_note_index(
                0,
                TriggerOptions {
                    activation: ActivationKind::Chord,
                    cancel: CancelMode::Immediate,
                    on_complete: Some(Box::new(move || {
                        let mut instrument = again.lock();
                        instrument
                            .trigger_note_index(7, TriggerOptions::default())
                            .unwrap();
                        *live.lock() = Some(instrument.live_activations());
                    })),
                },
            )
            .unwrap()
    };
    clock.tick();
    cancel.cancel();

    // the completing tick runs off the test thread so a lock cycle shows up
    // as a timeout instead of a hung test
    let (done, finished) = mpsc::channel();
    {
        let clock = clock.clone();
        thread::spawn(move || {
            clock.tick();
            let _ = done.send(());
        });
    }
    finished
        .recv_timeout(Duration::from_secs(3))
        .expect("tick did not finish");

    assert_eq!(*live_after_retrigger.lock(), Some(1));
    let instrument = instrument.lock();
    assert!(instrument.is_pitch_active(48));
    assert!(!instrument.is_pitch_active(36));
    assert_eq!(instrument.live_activations(), 1);
    assert_eq!(note_ons(&synth), vec![36, 40, 43, 48]);
}
