//! Interval timers driving the periodic envelope re-checks

use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

/// Handle to an interval registered with an [`IntervalTimer`]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerHandle(pub u64);

/// Repeating timers, polled by the host event loop
///
/// Intervals never fire on their own: the host calls [`poll_expired`](Self::poll_expired) and
/// dispatches the returned handles. When several periods of the same interval have elapsed since
/// the previous poll, the handle is reported once.
pub trait IntervalTimer {
    /// Registers an interval with a period in seconds. The first expiry is one period from now.
    ///
    /// A period that is not strictly positive, or too long for the timer to represent, yields
    /// an interval that never expires.
    fn set_interval(&mut self, period: f64, now: f64) -> TimerHandle;

    /// Unregisters an interval, unknown handles are ignored.
    fn clear_interval(&mut self, handle: TimerHandle);

    /// Handles of the intervals that expired at or before `now`, in registration order
    fn poll_expired(&mut self, now: f64) -> Vec<TimerHandle>;

    /// Number of registered intervals
    fn active(&self) -> usize;
}

/// Slack when comparing deadlines with the clock, absorbs float rounding of period multiples
const CLOCK_TOLERANCE: f64 = 1e-9;

fn is_valid_period(period: f64) -> bool {
    if period > 0. && period.is_finite() {
        true
    } else {
        log::error!("interval period {} s is out of range, it will never expire", period);
        false
    }
}

#[derive(Clone, Debug)]
struct Interval {
    period: f64,
    start: f64,
    /// number of periods already reported
    fired: u64,
}

impl Interval {
    fn deadline(&self) -> f64 {
        self.start + self.fired.saturating_add(1) as f64 * self.period
    }
}

/// Intervals measured on an externally supplied clock, usually the audio clock
///
/// Fully deterministic, so offline rendering and tests can step time at will.
#[derive(Clone, Debug, Default)]
pub struct ManualTimer {
    handle_inc: u64,
    intervals: BTreeMap<TimerHandle, Interval>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntervalTimer for ManualTimer {
    fn set_interval(&mut self, period: f64, now: f64) -> TimerHandle {
        let handle = TimerHandle(self.handle_inc);
        self.handle_inc += 1;

        // an infinite period puts the first deadline out of reach
        let period = if is_valid_period(period) {
            period
        } else {
            f64::INFINITY
        };
        let interval = Interval {
            period,
            start: now,
            fired: 0,
        };
        self.intervals.insert(handle, interval);

        handle
    }

    fn clear_interval(&mut self, handle: TimerHandle) {
        self.intervals.remove(&handle);
    }

    fn poll_expired(&mut self, now: f64) -> Vec<TimerHandle> {
        let now = now + CLOCK_TOLERANCE;

        self.intervals
            .iter_mut()
            .filter(|(_, interval)| interval.deadline() <= now)
            .map(|(handle, interval)| {
                // coalesce missed periods into a single expiry
                let elapsed = ((now - interval.start) / interval.period).floor() as u64;
                interval.fired = elapsed.max(interval.fired.saturating_add(1));
                *handle
            })
            .collect()
    }

    fn active(&self) -> usize {
        self.intervals.len()
    }
}

/// Intervals measured in wall-clock time, backed by `crossbeam_channel::tick`
///
/// The `now` arguments are ignored: each interval owns a ticker channel that is drained when
/// polled.
#[derive(Debug, Default)]
pub struct TickTimer {
    handle_inc: u64,
    tickers: BTreeMap<TimerHandle, Receiver<std::time::Instant>>,
}

impl TickTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntervalTimer for TickTimer {
    fn set_interval(&mut self, period: f64, _now: f64) -> TimerHandle {
        let handle = TimerHandle(self.handle_inc);
        self.handle_inc += 1;

        let ticker = if is_valid_period(period) {
            match Duration::try_from_secs_f64(period) {
                Ok(period) => crossbeam_channel::tick(period),
                Err(e) => {
                    log::error!("interval period {} s: {}, it will never expire", period, e);
                    crossbeam_channel::never()
                }
            }
        } else {
            crossbeam_channel::never()
        };
        self.tickers.insert(handle, ticker);

        handle
    }

    fn clear_interval(&mut self, handle: TimerHandle) {
        // dropping the receiver stops the ticker
        self.tickers.remove(&handle);
    }

    fn poll_expired(&mut self, _now: f64) -> Vec<TimerHandle> {
        let mut expired = vec![];

        for (handle, ticker) in self.tickers.iter() {
            let mut fired = false;
            loop {
                match ticker.try_recv() {
                    Ok(_) => fired = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if fired {
                expired.push(*handle);
            }
        }

        expired
    }

    fn active(&self) -> usize {
        self.tickers.len()
    }
}
