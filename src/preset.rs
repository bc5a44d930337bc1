//! Tone sets as stored between sessions, and the piano note table

use std::fmt::Display;
use std::str::FromStr;

use crate::voice::ToneSpec;
use crate::AudioError;

/// The 13 keys of the tutorial piano, C4 to C5, with their frequencies in Hertz
pub const NOTES: [(&str, f64); 13] = [
    ("C4", 261.63),
    ("C#", 277.18),
    ("D", 293.66),
    ("D#", 311.13),
    ("E", 329.63),
    ("F", 349.23),
    ("F#", 369.99),
    ("G", 392.00),
    ("G#", 415.30),
    ("A", 440.00),
    ("A#", 466.16),
    ("B", 493.88),
    ("C5", 523.25),
];

/// Frequency of a piano key by name
pub fn note_frequency(name: &str) -> Option<f64> {
    NOTES
        .iter()
        .find(|(note, _)| *note == name)
        .map(|&(_, frequency)| frequency)
}

/// Tones played when nothing was stored: a C major chord
pub fn default_tones() -> Vec<ToneSpec> {
    [261.63, 329.63, 392.00]
        .iter()
        .map(|&frequency| ToneSpec::new(frequency, 0.3, 1.5))
        .collect()
}

/// Tone parameters serialized as three comma separated lists of numbers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToneSet {
    pub frequencies: String,
    pub initial_amplitudes: String,
    pub time_constants: String,
}

fn join<I: IntoIterator<Item = f64>>(values: I) -> String {
    values
        .into_iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split<T>(list: &str, name: &str) -> Result<Vec<T>, AudioError>
where
    T: FromStr,
    T::Err: Display,
{
    if list.trim().is_empty() {
        return Ok(vec![]);
    }

    list.split(',')
        .map(|item| {
            item.trim()
                .parse()
                .map_err(|e| AudioError::Parse(format!("{} entry {:?}: {}", name, item, e)))
        })
        .collect()
}

impl ToneSet {
    /// Serialize tone specs, in order
    pub fn encode(specs: &[ToneSpec]) -> Self {
        Self {
            frequencies: join(specs.iter().map(|s| s.frequency)),
            initial_amplitudes: join(specs.iter().map(|s| s.initial_amplitude)),
            time_constants: join(specs.iter().map(|s| s.time_constant)),
        }
    }

    /// Parse stored lists back into tone specs.
    ///
    /// A list that was never stored (`None`) falls back to the matching column of
    /// [`default_tones`]. All three lists must have the same length.
    pub fn decode(
        frequencies: Option<&str>,
        initial_amplitudes: Option<&str>,
        time_constants: Option<&str>,
    ) -> Result<Vec<ToneSpec>, AudioError> {
        let defaults = Self::encode(&default_tones());

        let frequencies: Vec<f64> =
            split(frequencies.unwrap_or(&defaults.frequencies), "frequencies")?;
        let initial_amplitudes: Vec<f64> = split(
            initial_amplitudes.unwrap_or(&defaults.initial_amplitudes),
            "initial_amplitudes",
        )?;
        let time_constants: Vec<f64> = split(
            time_constants.unwrap_or(&defaults.time_constants),
            "time_constants",
        )?;

        if frequencies.len() != initial_amplitudes.len()
            || frequencies.len() != time_constants.len()
        {
            return Err(AudioError::Parse(format!(
                "list lengths differ: {} frequencies, {} amplitudes, {} time constants",
                frequencies.len(),
                initial_amplitudes.len(),
                time_constants.len()
            )));
        }

        let specs = frequencies
            .into_iter()
            .zip(initial_amplitudes)
            .zip(time_constants)
            .map(|((f, a), t)| ToneSpec::new(f, a, t))
            .collect();

        Ok(specs)
    }

    /// Parse this tone set, see [`ToneSet::decode`]
    pub fn to_specs(&self) -> Result<Vec<ToneSpec>, AudioError> {
        Self::decode(
            Some(&self.frequencies),
            Some(&self.initial_amplitudes),
            Some(&self.time_constants),
        )
    }
}
