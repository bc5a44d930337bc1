use std::error::Error;

use anasynth::context::{AudioBackend, OfflineContext, OfflineContextOptions};
use anasynth::preset::ToneSet;
use anasynth::scheduler::VoiceScheduler;
use anasynth::timer::ManualTimer;

// Render a decaying chord to a WAV file
//
// `cargo run -- chord.wav`
//
// The tones default to a C major chord. They can be overridden with comma separated lists in
// `ANASYNTH_FREQUENCIES`, `ANASYNTH_AMPLITUDES` and `ANASYNTH_TIME_CONSTANTS`; the render length
// in seconds is read from `ANASYNTH_SECONDS`.
//
// `RUST_LOG=debug ANASYNTH_FREQUENCIES=440 cargo run`
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "anasynth.wav".to_string());
    let seconds = match std::env::var("ANASYNTH_SECONDS") {
        Ok(value) => value.parse::<f64>()?,
        Err(_) => 6.,
    };

    let frequencies = std::env::var("ANASYNTH_FREQUENCIES").ok();
    let amplitudes = std::env::var("ANASYNTH_AMPLITUDES").ok();
    let time_constants = std::env::var("ANASYNTH_TIME_CONSTANTS").ok();
    let tones = ToneSet::decode(
        frequencies.as_deref(),
        amplitudes.as_deref(),
        time_constants.as_deref(),
    )?;

    let context = OfflineContext::new(OfflineContextOptions::default());
    let sample_rate = context.sample_rate().0;
    let mut scheduler = VoiceScheduler::new(context, ManualTimer::new());

    scheduler.initialize()?;
    let ids = scheduler.add_voices(&tones)?;
    let stored = ToneSet::encode(&tones);
    log::info!(
        "playing {} Hz (amplitudes {}, time constants {} s)",
        stored.frequencies,
        stored.initial_amplitudes,
        stored.time_constants
    );
    scheduler.play(&ids)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;

    // 10 ms steps, timers are pumped in between like a UI event loop would
    let step = (sample_rate / 100) as usize;
    let total = (seconds.max(0.) * sample_rate as f64) as usize;
    let mut rendered = 0;
    let mut next_report = 0.;

    while rendered < total {
        let frames = step.min(total - rendered);
        for sample in scheduler.backend_mut().render(frames) {
            writer.write_sample(sample)?;
        }
        rendered += frames;

        scheduler.run_pending_timers();

        let now = scheduler.backend().current_time();
        if now >= next_report {
            let amplitudes: Vec<String> = ids
                .iter()
                .map(|&id| format!("{:.4}", scheduler.current_amplitude(id).unwrap_or(0.)))
                .collect();
            log::info!("t = {:.2} s, amplitudes [{}]", now, amplitudes.join(", "));
            next_report += 0.5;
        }
    }

    writer.finalize()?;
    scheduler.remove_all()?;
    log::info!("wrote {:.2} s of audio to {}", seconds, path);

    Ok(())
}
