//! Voices: a sine oscillator and its gain envelope

use std::f64::consts::PI;
use std::fmt;

use crate::context::NodeId;
use crate::timer::TimerHandle;
use crate::AudioError;

/// Unique identifier of a voice within a [`VoiceScheduler`](crate::scheduler::VoiceScheduler)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Parameters of a decaying tone
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ToneSpec {
    /// oscillator frequency in Hertz
    pub frequency: f64,
    /// gain at the moment playback starts
    pub initial_amplitude: f64,
    /// seconds for the amplitude to drop by a factor e
    pub time_constant: f64,
}

impl ToneSpec {
    pub fn new(frequency: f64, initial_amplitude: f64, time_constant: f64) -> Self {
        Self {
            frequency,
            initial_amplitude,
            time_constant,
        }
    }

    /// Reject specs that could never produce a valid envelope.
    ///
    /// Frequency and time constant must be finite and strictly positive. The amplitude must not
    /// be negative and must fit in the `f32` gain handed to the backend.
    pub fn validate(&self) -> Result<(), AudioError> {
        let checks = [
            ("frequency", self.frequency, self.frequency > 0.),
            ("time_constant", self.time_constant, self.time_constant > 0.),
            (
                "initial_amplitude",
                self.initial_amplitude,
                self.initial_amplitude >= 0. && self.initial_amplitude <= f32::MAX as f64,
            ),
        ];

        for &(name, value, in_range) in checks.iter() {
            if !value.is_finite() || !in_range {
                return Err(AudioError::InvalidParameter { name, value });
            }
        }

        Ok(())
    }
}

/// A registered voice: tone parameters, audio nodes and envelope bookkeeping
///
/// A voice is playing exactly when it owns a decay timer, so there can never be a second timer
/// for the same voice nor a timer for a stopped one.
#[derive(Clone, Debug)]
pub(crate) struct Voice {
    pub id: VoiceId,
    pub spec: ToneSpec,
    pub oscillator: NodeId,
    pub gain: NodeId,
    pub begin_time: f64,
    pub elapsed_periods: u64,
    pub timer: Option<TimerHandle>,
}

impl Voice {
    pub fn new(id: VoiceId, spec: ToneSpec, oscillator: NodeId, gain: NodeId) -> Self {
        Self {
            id,
            spec,
            oscillator,
            gain,
            begin_time: 0.,
            elapsed_periods: 0,
            timer: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.timer.is_some()
    }

    /// Continuous envelope `A * e^(-(now - begin) / τ)`, zero when stopped
    pub fn amplitude_at(&self, now: f64) -> f64 {
        if !self.is_playing() {
            return 0.;
        }

        let offset = now - self.begin_time;
        self.spec.initial_amplitude * (-offset / self.spec.time_constant).exp()
    }

    /// Instantaneous waveform value, with time stretched by `slowdown`
    pub fn signal_at(&self, now: f64, slowdown: f64) -> f64 {
        let offset = (now - self.begin_time) / slowdown;
        self.amplitude_at(now) * (2. * PI * self.spec.frequency * offset).sin()
    }

    /// Envelope value after `periods` whole time constants
    pub fn amplitude_after(&self, periods: u64) -> f64 {
        self.spec.initial_amplitude * (-(periods as f64)).exp()
    }
}
