//! RLC circuit physics and speaker loudness
//!
//! Converts circuit components into the parameters of a decaying tone: the resonant frequency of
//! the LC pair, the time constant of the resistive damping and the loudness of the speaker driven
//! by the circuit.

use std::f64::consts::PI;

use crate::voice::ToneSpec;
use crate::AudioError;

/// Density of air at 20 °C and 101.325 kPa, in kg/m³
pub const AIR_DENSITY: f64 = 1.2923;

/// Speed of sound at 20 °C, in m/s
pub const SPEED_OF_SOUND: f64 = 343.;

/// Threshold of human hearing, in Pa
pub const REFERENCE_PRESSURE: f64 = 20e-6;

fn finite(name: &'static str, value: f64) -> Result<f64, AudioError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AudioError::InvalidParameter { name, value })
    }
}

/// Amplitude time constant `2L / R` of a series RLC circuit, in seconds
pub fn time_constant(inductance: f64, resistance: f64) -> Result<f64, AudioError> {
    finite("time_constant", 2. * inductance / resistance)
}

/// Resonant frequency `1 / (2π √(LC))` in Hertz, with the capacitance given in nanofarad
pub fn resonant_frequency(inductance: f64, capacitance_nf: f64) -> Result<f64, AudioError> {
    finite(
        "frequency",
        1. / (2. * PI * (capacitance_nf * 1e-9 * inductance).sqrt()),
    )
}

/// Average power `½ C V² / L` delivered by a capacitor discharging through the inductor
pub fn average_power(capacitance: f64, volts: f64, inductance: f64) -> Result<f64, AudioError> {
    finite("power", 0.5 * capacitance * volts * volts / inductance)
}

/// Sound pressure level in dB at `distance` meters from a point source radiating `power` watts
///
/// Assumes the listener's eardrums are perpendicular to the sound.
pub fn watts_to_decibels(power: f64, distance: f64) -> f64 {
    let sound_pressure =
        ((power * AIR_DENSITY * SPEED_OF_SOUND) / (4. * PI * distance * distance)).sqrt();
    20. * (sound_pressure / REFERENCE_PRESSURE).log10()
}

/// Acoustic power in watts of a point source heard at `sound_pressure_level` dB from `distance`
/// meters, inverse of [`watts_to_decibels`]
pub fn decibels_to_watts(sound_pressure_level: f64, distance: f64) -> f64 {
    let sound_pressure = 10f64.powf(sound_pressure_level / 20.) * REFERENCE_PRESSURE;
    (4. * PI * distance * distance * sound_pressure * sound_pressure)
        / (AIR_DENSITY * SPEED_OF_SOUND)
}

/// Output gain of a speaker fed `watts`, given its sensitivity (dB at 1 m for 1 W)
pub fn speaker_amplitude(watts: f64, sensitivity: f64) -> f64 {
    watts * decibels_to_watts(sensitivity, 1.)
}

/// A series RLC circuit driving a speaker
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Circuit {
    /// ohm
    pub resistance: f64,
    /// henry
    pub inductance: f64,
    /// nanofarad
    pub capacitance: f64,
    /// watts delivered to the speaker
    pub power: f64,
    /// speaker sensitivity, dB at 1 m for 1 W
    pub sensitivity: f64,
}

impl Circuit {
    /// Tone produced by the circuit
    pub fn tone(&self) -> Result<ToneSpec, AudioError> {
        let spec = ToneSpec::new(
            resonant_frequency(self.inductance, self.capacitance)?,
            speaker_amplitude(self.power, self.sensitivity),
            time_constant(self.inductance, self.resistance)?,
        );
        spec.validate()?;
        Ok(spec)
    }
}
