//! Gain automation: a timeline of scheduled value changes
//!
//! Follows the AudioParam rules of the Web Audio API:
//! cf. <https://www.w3.org/TR/webaudio/#computation-of-value>

use crate::context::BackendError;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum AutomationEventType {
    SetValueAtTime,
    LinearRampToValueAtTime,
    ExponentialRampToValueAtTime,
}

#[derive(Copy, Clone, Debug)]
struct AutomationEvent {
    event_type: AutomationEventType,
    value: f32,
    time: f64,
}

/// Scheduled values of a single parameter, ordered by event time
///
/// Events with equal times keep their insertion order.
#[derive(Clone, Debug)]
pub struct AutomationTimeline {
    default_value: f32,
    min_value: f32,
    max_value: f32,
    inner: Vec<AutomationEvent>,
}

impl AutomationTimeline {
    pub fn new(default_value: f32, min_value: f32, max_value: f32) -> Self {
        Self {
            default_value,
            min_value,
            max_value,
            inner: Vec::new(),
        }
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Number of pending and past events
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn set_value_at_time(&mut self, value: f32, start_time: f64) {
        self.push(AutomationEvent {
            event_type: AutomationEventType::SetValueAtTime,
            value,
            time: start_time,
        });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.push_ramp(AutomationEvent {
            event_type: AutomationEventType::LinearRampToValueAtTime,
            value,
            time: end_time,
        });
    }

    /// Exponential ramps are undefined for a zero target, such a call is a range error.
    pub fn exponential_ramp_to_value_at_time(
        &mut self,
        value: f32,
        end_time: f64,
    ) -> Result<(), BackendError> {
        if value == 0. || !value.is_finite() {
            return Err(BackendError::Range(value));
        }

        self.push_ramp(AutomationEvent {
            event_type: AutomationEventType::ExponentialRampToValueAtTime,
            value,
            time: end_time,
        });

        Ok(())
    }

    /// Remove all events with `time >= cancel_time`.
    ///
    /// A ramp that was in progress at `cancel_time` is dropped as a whole, the value from before
    /// that ramp is restored.
    pub fn cancel_scheduled_values(&mut self, cancel_time: f64) {
        self.inner.retain(|queued| queued.time < cancel_time);
    }

    /// Value of the parameter at time `t`, clamped to its nominal range
    pub fn value_at(&self, t: f64) -> f32 {
        let mut last: Option<&AutomationEvent> = None;

        for event in self.inner.iter() {
            if event.time <= t {
                last = Some(event);
                continue;
            }

            // first event in the future of `t`: only a ramp affects the current value
            let start = match last {
                Some(start) => start,
                None => break,
            };

            let phase = (t - start.time) / (event.time - start.time);

            match event.event_type {
                AutomationEventType::SetValueAtTime => break,
                // v(t) = v0 + (v1 - v0) * ((t - t0) / (t1 - t0))
                AutomationEventType::LinearRampToValueAtTime => {
                    let value = start.value + (event.value - start.value) * phase as f32;
                    return self.clamp(value);
                }
                // v(t) = v0 * (v1 / v0)^((t - t0) / (t1 - t0))
                AutomationEventType::ExponentialRampToValueAtTime => {
                    // v0 == 0 or opposite signs: hold v0 until the end of the ramp
                    if start.value == 0. || start.value * event.value < 0. {
                        return self.clamp(start.value);
                    }
                    let ratio = (event.value / start.value) as f64;
                    let value = start.value as f64 * ratio.powf(phase);
                    return self.clamp(value as f32);
                }
            }
        }

        match last {
            Some(event) => self.clamp(event.value),
            None => self.default_value,
        }
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min_value, self.max_value)
    }

    fn push(&mut self, event: AutomationEvent) {
        let index = self
            .inner
            .iter()
            .position(|queued| queued.time > event.time)
            .unwrap_or_else(|| self.inner.len());
        self.inner.insert(index, event);
    }

    // a ramp needs a starting point, if nothing precedes it the default value at t = 0 is used
    fn push_ramp(&mut self, event: AutomationEvent) {
        if self.inner.is_empty() {
            let default_value = self.default_value;
            self.set_value_at_time(default_value, 0.);
        }
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;

    fn gain() -> AutomationTimeline {
        AutomationTimeline::new(1., f32::MIN, f32::MAX)
    }

    #[test]
    fn test_default_value() {
        let param = gain();
        assert!(param.is_empty());
        assert_float_eq!(param.value_at(0.), 1., abs <= 0.);
        assert_float_eq!(param.value_at(100.), 1., abs <= 0.);
    }

    #[test]
    fn test_steps() {
        let mut param = AutomationTimeline::new(0., -10., 10.);
        param.set_value_at_time(5., 2.0);
        param.set_value_at_time(12., 8.0); // should clamp
        param.set_value_at_time(8., 10.0);

        let vs: Vec<f32> = (0..12).map(|t| param.value_at(t as f64)).collect();
        assert_float_eq!(
            vs.as_slice(),
            &[0., 0., 5., 5., 5., 5., 5., 5., 10., 10., 8., 8.][..],
            abs_all <= 0.
        );
    }

    #[test]
    fn test_out_of_order_insertion() {
        let mut param = AutomationTimeline::new(0., -10., 10.);
        param.set_value_at_time(8., 6.0);
        param.set_value_at_time(5., 2.0);

        assert_float_eq!(param.value_at(1.), 0., abs <= 0.);
        assert_float_eq!(param.value_at(3.), 5., abs <= 0.);
        assert_float_eq!(param.value_at(7.), 8., abs <= 0.);
    }

    #[test]
    fn test_linear_ramp() {
        let mut param = AutomationTimeline::new(0., -10., 10.);
        param.set_value_at_time(5., 2.0);
        param.linear_ramp_to_value_at_time(8.0, 5.0);

        assert_float_eq!(param.value_at(1.), 0., abs <= 0.);
        assert_float_eq!(param.value_at(2.), 5., abs <= 1e-6);
        assert_float_eq!(param.value_at(3.), 6., abs <= 1e-6);
        assert_float_eq!(param.value_at(4.5), 7.5, abs <= 1e-6);
        assert_float_eq!(param.value_at(5.), 8., abs <= 0.);
        assert_float_eq!(param.value_at(9.), 8., abs <= 0.);
    }

    #[test]
    fn test_ramp_without_start_event() {
        let mut param = AutomationTimeline::new(0., -10., 10.);
        param.linear_ramp_to_value_at_time(10., 10.);

        assert_eq!(param.len(), 2);
        assert_float_eq!(param.value_at(5.), 5., abs <= 1e-6);
    }

    #[test]
    fn test_exponential_ramp() {
        let mut param = gain();
        param.set_value_at_time(0.5, 1.);
        param
            .exponential_ramp_to_value_at_time(0.5 * (-1f32).exp(), 2.5)
            .unwrap();

        assert_float_eq!(param.value_at(1.), 0.5, abs <= 1e-6);
        // halfway through the ramp the value is v0 * sqrt(v1 / v0)
        assert_float_eq!(param.value_at(1.75), 0.5 * (-0.5f32).exp(), abs <= 1e-6);
        assert_float_eq!(param.value_at(2.5), 0.5 * (-1f32).exp(), abs <= 1e-6);
        assert_float_eq!(param.value_at(4.), 0.5 * (-1f32).exp(), abs <= 1e-6);
    }

    #[test]
    fn test_exponential_ramp_to_zero_is_range_error() {
        let mut param = gain();
        assert_eq!(
            param.exponential_ramp_to_value_at_time(0., 1.),
            Err(BackendError::Range(0.))
        );
        assert!(param.is_empty());
    }

    #[test]
    fn test_exponential_ramp_opposite_signs_holds() {
        let mut param = AutomationTimeline::new(0., -10., 10.);
        param.set_value_at_time(1., 0.);
        param.exponential_ramp_to_value_at_time(-1., 10.).unwrap();

        assert_float_eq!(param.value_at(5.), 1., abs <= 0.);
        assert_float_eq!(param.value_at(10.), -1., abs <= 0.);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut param = gain();
        param.set_value_at_time(0.5, 0.);
        param.exponential_ramp_to_value_at_time(0.1, 2.).unwrap();
        param.set_value_at_time(0.3, 3.);

        param.cancel_scheduled_values(1.);

        // the ramp in progress is dropped, value from before the ramp is restored
        assert_eq!(param.len(), 1);
        assert_float_eq!(param.value_at(1.5), 0.5, abs <= 0.);
        assert_float_eq!(param.value_at(5.), 0.5, abs <= 0.);
    }
}
