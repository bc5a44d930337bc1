use float_eq::assert_float_eq;

use anasynth::context::{OfflineContext, OfflineContextOptions};
use anasynth::scheduler::VoiceScheduler;
use anasynth::timer::ManualTimer;
use anasynth::voice::ToneSpec;
use anasynth::SampleRate;

const SAMPLE_RATE: u32 = 44_100;

// 441 Hz has a period of exactly 100 frames
const FREQUENCY: f64 = 441.;

type Scheduler = VoiceScheduler<OfflineContext, ManualTimer>;

fn scheduler() -> Scheduler {
    let context = OfflineContext::new(OfflineContextOptions {
        sample_rate: SampleRate(SAMPLE_RATE),
    });
    let mut scheduler = VoiceScheduler::new(context, ManualTimer::new());
    scheduler.initialize().unwrap();
    scheduler
}

// render in 10 ms chunks, firing timers in between
fn render_for(scheduler: &mut Scheduler, seconds: f64) -> Vec<f32> {
    let chunk = (SAMPLE_RATE / 100) as usize;
    let chunks = (seconds * 100.).round() as usize;

    let mut output = Vec::with_capacity(chunk * chunks);
    for _ in 0..chunks {
        output.extend(scheduler.backend_mut().render(chunk));
        scheduler.run_pending_timers();
    }
    output
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0f32, |max, s| max.max(s.abs()))
}

fn envelope(amplitude: f64, time_constant: f64, frame: usize) -> f32 {
    let t = frame as f64 / SAMPLE_RATE as f64;
    (amplitude * (-t / time_constant).exp()) as f32
}

#[test]
fn test_silent_until_played() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[ToneSpec::new(FREQUENCY, 0.5, 1.)])
        .unwrap();

    let output = render_for(&mut scheduler, 0.5);
    assert_float_eq!(peak(&output), 0., abs <= 0.);

    scheduler.play(&ids).unwrap();
    let output = render_for(&mut scheduler, 0.01);
    assert!(peak(&output) > 0.4);
}

#[test]
fn test_rendered_envelope() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[ToneSpec::new(FREQUENCY, 0.5, 0.5)])
        .unwrap();
    scheduler.play(&ids).unwrap();

    let output = render_for(&mut scheduler, 1.5);

    // the sine peaks at frame 25 of every period
    for &start in [0, 22_050, 44_100, 66_000].iter() {
        let period = &output[start..start + 100];
        assert_float_eq!(
            peak(period),
            envelope(0.5, 0.5, start + 25),
            abs <= 1e-5
        );
    }
}

#[test]
fn test_chord_is_mixed() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[
            ToneSpec::new(FREQUENCY, 0.3, 1.),
            ToneSpec::new(2. * FREQUENCY, 0.2, 1.),
        ])
        .unwrap();
    scheduler.play(&ids).unwrap();

    let output = scheduler.backend_mut().render(100);

    // a quarter period of the low voice is half a period of the high one
    assert_float_eq!(output[25], envelope(0.3, 1., 25), abs <= 1e-6);
    assert_float_eq!(output[0], 0., abs <= 1e-6);
}

#[test]
fn test_stop_silences_output() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[
            ToneSpec::new(FREQUENCY, 0.5, 1.),
            ToneSpec::new(2. * FREQUENCY, 0.5, 1.),
        ])
        .unwrap();
    scheduler.play(&ids).unwrap();
    render_for(&mut scheduler, 0.25);

    scheduler.stop(&ids[..1]).unwrap();
    let output = render_for(&mut scheduler, 0.01);
    assert!(peak(&output) > 0.3, "second voice keeps playing");

    scheduler.stop(&ids[1..]).unwrap();
    let output = render_for(&mut scheduler, 0.5);
    assert_float_eq!(peak(&output), 0., abs <= 0.);
}

#[test]
fn test_replay_restarts_envelope() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[ToneSpec::new(FREQUENCY, 0.5, 0.1)])
        .unwrap();
    scheduler.play(&ids).unwrap();

    let output = render_for(&mut scheduler, 0.5);
    assert!(peak(&output[output.len() - 100..]) < 0.01);

    scheduler.stop(&ids).unwrap();
    scheduler.play(&ids).unwrap();

    let output = render_for(&mut scheduler, 0.01);
    assert_float_eq!(peak(&output[..100]), 0.5, abs <= 1e-2);
}

#[test]
fn test_floored_voice_is_inaudible() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[ToneSpec::new(FREQUENCY, 0.5, 0.01)])
        .unwrap();
    scheduler.play(&ids).unwrap();

    let output = render_for(&mut scheduler, 1.);
    assert!(scheduler.is_playing(ids[0]));
    assert!(peak(&output[output.len() - 441..]) < 1e-12);
}

#[test]
fn test_removed_voice_leaves_graph() {
    let mut scheduler = scheduler();
    let ids = scheduler
        .add_voices(&[ToneSpec::new(FREQUENCY, 0.5, 1.)])
        .unwrap();
    scheduler.play(&ids).unwrap();
    render_for(&mut scheduler, 0.1);

    let removed = scheduler.remove_voices(&ids).unwrap();
    assert_eq!(removed, vec![ToneSpec::new(FREQUENCY, 0.5, 1.)]);
    assert_eq!(scheduler.backend().node_count(), 1);

    let output = render_for(&mut scheduler, 0.1);
    assert_float_eq!(peak(&output), 0., abs <= 0.);
}
