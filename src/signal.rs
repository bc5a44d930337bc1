//! Reference waveforms for drawing, independent of any playing voice
//!
//! These only feed the diagrams, nothing here is ever sent to the audio output.

use std::f64::consts::PI;

/// Frequency of the reference tone
pub const EXAMPLE_FREQUENCY: f64 = 440.;

/// Length of one decay cycle of the RC example, in seconds
pub const RC_CYCLE: f64 = 5.;

/// Part of the RC cycle during which the example rings, in seconds
pub const RC_RING: f64 = 4.;

/// Unit 440 Hz sine slowed down by a factor 1000
pub fn example_signal(t: f64) -> f64 {
    (2. * PI * EXAMPLE_FREQUENCY * t / 1000.).sin()
}

/// Unit 440 Hz sine decaying with a 1 s time constant, restarted every 5 s
///
/// The last second of each cycle is silent.
pub fn example_rc_signal(t: f64) -> f64 {
    rc_envelope(t) * (2. * PI * EXAMPLE_FREQUENCY * t).sin()
}

/// [`example_rc_signal`] with its carrier slowed down by a factor 100
pub fn slowed_example_rc_signal(t: f64) -> f64 {
    rc_envelope(t) * (2. * PI * EXAMPLE_FREQUENCY * t / 100.).sin()
}

fn rc_envelope(t: f64) -> f64 {
    let cycle = t.rem_euclid(RC_CYCLE);
    if cycle > RC_RING {
        0.
    } else {
        (-cycle).exp()
    }
}
