//! Decaying oscillator voices for RLC-circuit acoustics, kept in sync with an audio clock.
//!
//! Every voice is a sine oscillator feeding its own gain node. While a voice plays, its gain
//! follows `A * e^(-t/τ)`: the envelope is approximated by a chain of exponential ramps, re-armed
//! once per time constant by an interval timer.
//!
//! # Example
//! ```rust
//! use anasynth::context::{AudioBackend, OfflineContext};
//! use anasynth::scheduler::VoiceScheduler;
//! use anasynth::timer::ManualTimer;
//! use anasynth::voice::ToneSpec;
//!
//! let mut scheduler = VoiceScheduler::new(OfflineContext::default(), ManualTimer::new());
//! scheduler.initialize().unwrap();
//!
//! // an RLC circuit ringing at 440 Hz, with a time constant of 1.5 seconds
//! let ids = scheduler.add_voices(&[ToneSpec::new(440., 0.5, 1.5)]).unwrap();
//! scheduler.play(&ids).unwrap();
//!
//! // one time constant later the amplitude has dropped by a factor e
//! scheduler.backend_mut().advance(1.5);
//! scheduler.run_pending_timers();
//! let amplitude = scheduler.current_amplitude(ids[0]).unwrap();
//! assert!((amplitude - 0.5 * (-1f64).exp()).abs() < 1e-9);
//! ```

use std::fmt;

/// Smallest ramp target the scheduler will hand to the backend
///
/// Exponential ramps cannot target zero, so once `A * e^-n` drops below this value the envelope
/// is considered silent and no further ramps are scheduled.
pub const DECAY_FLOOR: f64 = 1e-20;

pub mod context;
pub mod param;
pub mod preset;
pub mod rlc;
pub mod scheduler;
pub mod signal;
pub mod timer;
pub mod voice;

pub(crate) mod graph;

use context::BackendError;
use voice::VoiceId;

/// Number of samples processed per second (Hertz) for a single channel of audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleRate(pub u32);

/// Failure of a scheduler operation
///
/// None of these are fatal: the scheduler logs them and leaves its registry untouched, so the
/// caller may simply retry (e.g. after [`initialize`](scheduler::VoiceScheduler::initialize)).
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// The audio backend has not been opened yet
    NotInitialized,
    /// No voice with this id is registered
    NotFound(VoiceId),
    /// A tone or circuit parameter is out of its valid range
    InvalidParameter { name: &'static str, value: f64 },
    /// The backend refused a call
    Backend(BackendError),
    /// Stored tone data could not be parsed
    Parse(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AudioError::NotInitialized => {
                write!(f, "NotInitializedError: audio used before initialize()")
            }
            AudioError::NotFound(id) => write!(f, "NotFoundError: no voice with id {}", id),
            AudioError::InvalidParameter { name, value } => {
                write!(f, "InvalidParameter: {} = {}", name, value)
            }
            AudioError::Backend(e) => write!(f, "backend error: {}", e),
            AudioError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for AudioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AudioError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for AudioError {
    fn from(e: BackendError) -> Self {
        AudioError::Backend(e)
    }
}

/// Partial success of a batch operation
///
/// Batch calls process every id they are given; `completed` holds the results of the ids that
/// succeeded and `errors` one entry per id that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchError<T> {
    pub completed: Vec<T>,
    pub errors: Vec<AudioError>,
}

impl<T> BatchError<T> {
    pub(crate) fn collect(completed: Vec<T>, errors: Vec<AudioError>) -> Result<Vec<T>, Self> {
        if errors.is_empty() {
            Ok(completed)
        } else {
            Err(Self { completed, errors })
        }
    }
}

impl<T> fmt::Display for BatchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} of {} operations failed",
            self.errors.len(),
            self.errors.len() + self.completed.len()
        )?;
        if let Some(first) = self.errors.first() {
            write!(f, " (first: {})", first)?;
        }
        Ok(())
    }
}

impl<T: fmt::Debug> std::error::Error for BatchError<T> {}
