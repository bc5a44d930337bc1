//! Voice registry and exponential decay scheduler

use std::collections::BTreeMap;

use crate::context::{AudioBackend, BackendError, NodeId};
use crate::timer::IntervalTimer;
use crate::voice::{ToneSpec, Voice, VoiceId};
use crate::{AudioError, BatchError, DECAY_FLOOR};

/// Options for constructing a [`VoiceScheduler`]
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    /// Envelope targets below this amplitude are treated as silence. Values below the smallest
    /// positive normal `f32` are raised to it, since ramp targets are passed on as `f32`.
    pub decay_floor: f64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            decay_floor: DECAY_FLOOR,
        }
    }
}

/// Outcome of a single [`VoiceScheduler::decay_tick`]
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum DecayStep {
    /// The voice is not playing, nothing to do
    Idle,
    /// No new time constant started since the previous ramp was scheduled
    Skipped,
    /// A ramp towards `target`, reached at `end_time`, has been scheduled
    Ramped {
        periods: u64,
        target: f64,
        end_time: f64,
    },
    /// The envelope is below the decay floor; the voice keeps playing inaudibly and no ramp is
    /// scheduled anymore
    Floored { periods: u64 },
}

/// Registry of decaying sine voices, keeping their gain envelopes in line with `A * e^(-t/τ)`
///
/// Voices are created in batches with [`add_voices`](Self::add_voices). Their oscillators are
/// started right away and stay silent until [`play`](Self::play) connects them to their gain
/// node. While a voice plays, an interval timer with a period of one time constant triggers
/// [`decay_tick`](Self::decay_tick), which schedules an exponential ramp to the envelope value at
/// the end of the next period. The host event loop drives those timers through
/// [`run_pending_timers`](Self::run_pending_timers).
///
/// Nothing works before [`initialize`](Self::initialize): such calls are logged and return
/// [`AudioError::NotInitialized`].
pub struct VoiceScheduler<B, T> {
    backend: B,
    timer: T,
    options: SchedulerOptions,
    /// shared gain stage, feeding the backend destination
    output: Option<NodeId>,
    voices: BTreeMap<VoiceId, Voice>,
    /// incrementing id to assign to voices
    voice_id_inc: u64,
}

impl<B: AudioBackend, T: IntervalTimer> VoiceScheduler<B, T> {
    pub fn new(backend: B, timer: T) -> Self {
        Self::with_options(backend, timer, SchedulerOptions::default())
    }

    pub fn with_options(backend: B, timer: T, options: SchedulerOptions) -> Self {
        let options = SchedulerOptions {
            decay_floor: options.decay_floor.max(f32::MIN_POSITIVE as f64),
        };

        Self {
            backend,
            timer,
            options,
            output: None,
            voices: BTreeMap::new(),
            voice_id_inc: 1,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.output.is_some()
    }

    /// Shared gain stage all voices are mixed into
    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    /// Open the backend and set up the shared output stage.
    ///
    /// Must be called from a user gesture on platforms that require one. Calling it again after
    /// it succeeded is a no-op.
    pub fn initialize(&mut self) -> Result<(), AudioError> {
        if self.is_initialized() {
            return Ok(());
        }

        let result = self.open_output();
        match &result {
            Ok(output) => {
                log::info!("audio initialized, output stage {:?}", output);
                self.output = Some(*output);
            }
            Err(e) => log::error!("audio initialization failed: {}", e),
        }

        result.map(|_| ())
    }

    fn open_output(&mut self) -> Result<NodeId, AudioError> {
        if !self.backend.is_open() {
            self.backend.open()?;
        }

        let output = self.backend.create_gain()?;
        let destination = self.backend.destination();
        if let Err(e) = self.backend.connect(output, destination) {
            let _ = self.backend.release(output);
            return Err(e.into());
        }

        Ok(output)
    }

    fn ensure_initialized(&self, operation: &str) -> Result<NodeId, AudioError> {
        match self.output {
            Some(output) => Ok(output),
            None => {
                log::error!("{}() called before initialize()", operation);
                Err(AudioError::NotInitialized)
            }
        }
    }

    fn voice(&self, id: VoiceId) -> Result<&Voice, AudioError> {
        self.voices.get(&id).ok_or_else(|| {
            log::error!("no voice with id {}", id);
            AudioError::NotFound(id)
        })
    }

    /// Register a batch of voices and return their ids, in order.
    ///
    /// The whole batch is validated first: a single invalid spec rejects the batch before any
    /// audio node is created. When the backend fails halfway, the voices already created for
    /// this batch are torn down again. Oscillators are started immediately but stay silent until
    /// played.
    pub fn add_voices(&mut self, specs: &[ToneSpec]) -> Result<Vec<VoiceId>, AudioError> {
        let output = self.ensure_initialized("add_voices")?;

        if let Some(e) = specs.iter().find_map(|spec| spec.validate().err()) {
            log::warn!("rejected tone batch: {}", e);
            return Err(e);
        }

        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = VoiceId(self.voice_id_inc);
            let voice = match self.create_voice(id, *spec, output) {
                Ok(voice) => voice,
                Err(e) => {
                    log::error!("creating voice {} failed, dropping its batch: {}", id, e);
                    for &added in ids.iter() {
                        let _ = self.remove_voice(added);
                    }
                    return Err(e);
                }
            };
            self.voice_id_inc += 1;

            log::debug!(
                "added voice {}: {} Hz, amplitude {}, time constant {} s",
                id,
                spec.frequency,
                spec.initial_amplitude,
                spec.time_constant
            );
            self.voices.insert(id, voice);
            ids.push(id);
        }

        Ok(ids)
    }

    fn create_voice(
        &mut self,
        id: VoiceId,
        spec: ToneSpec,
        output: NodeId,
    ) -> Result<Voice, AudioError> {
        let oscillator = self.backend.create_oscillator(spec.frequency)?;
        let gain = match self.backend.create_gain() {
            Ok(gain) => gain,
            Err(e) => {
                let _ = self.backend.release(oscillator);
                return Err(e.into());
            }
        };

        let armed = self
            .backend
            .connect(gain, output)
            .and_then(|_| self.backend.start(oscillator));
        if let Err(e) = armed {
            let _ = self.backend.release(oscillator);
            let _ = self.backend.release(gain);
            return Err(e.into());
        }

        Ok(Voice::new(id, spec, oscillator, gain))
    }

    /// Tear down voices and return their tone parameters.
    ///
    /// Playing voices are stopped first. Unknown ids are reported without affecting the others.
    pub fn remove_voices(
        &mut self,
        ids: &[VoiceId],
    ) -> Result<Vec<ToneSpec>, BatchError<ToneSpec>> {
        if let Err(e) = self.ensure_initialized("remove_voices") {
            return BatchError::collect(vec![], vec![e]);
        }

        let mut removed = vec![];
        let mut errors = vec![];

        for &id in ids {
            match self.remove_voice(id) {
                Ok(spec) => removed.push(spec),
                Err(e) => errors.push(e),
            }
        }

        BatchError::collect(removed, errors)
    }

    // Backend failures are logged but never keep the record alive, the nodes are left to the
    // backend.
    fn remove_voice(&mut self, id: VoiceId) -> Result<ToneSpec, AudioError> {
        let voice = self.voice(id)?.clone();
        let now = self.backend.current_time();

        if let Some(timer) = voice.timer {
            let cancelled = self.backend.cancel_scheduled_values(voice.gain, now);
            log_teardown(id, "cancel", cancelled);
            let disconnected = self
                .backend
                .disconnect(voice.oscillator, Some(voice.gain));
            log_teardown(id, "disconnect oscillator", disconnected);
            self.timer.clear_interval(timer);
        }

        log_teardown(id, "disconnect gain", self.backend.disconnect(voice.gain, None));
        log_teardown(id, "stop", self.backend.stop(voice.oscillator));
        log_teardown(id, "release oscillator", self.backend.release(voice.oscillator));
        log_teardown(id, "release gain", self.backend.release(voice.gain));

        self.voices.remove(&id);
        log::debug!("removed voice {}", id);

        Ok(voice.spec)
    }

    /// Remove every voice. Fine to call on an empty registry.
    pub fn remove_all(&mut self) -> Result<Vec<ToneSpec>, BatchError<ToneSpec>> {
        let ids = self.voice_ids();
        self.remove_voices(&ids)
    }

    /// Start the voices that are not playing yet, playing ones are left untouched.
    pub fn play(&mut self, ids: &[VoiceId]) -> Result<Vec<VoiceId>, BatchError<VoiceId>> {
        self.for_each_voice("play", ids, Self::start_voice)
    }

    /// Stop the voices that are playing. Stopping a stopped voice is a no-op.
    pub fn stop(&mut self, ids: &[VoiceId]) -> Result<Vec<VoiceId>, BatchError<VoiceId>> {
        self.for_each_voice("stop", ids, Self::stop_voice)
    }

    /// Start stopped voices and stop playing ones.
    pub fn play_toggle(&mut self, ids: &[VoiceId]) -> Result<Vec<VoiceId>, BatchError<VoiceId>> {
        self.for_each_voice("play_toggle", ids, |scheduler, id| {
            if scheduler.is_playing(id) {
                scheduler.stop_voice(id)
            } else {
                scheduler.start_voice(id)
            }
        })
    }

    /// Global play/pause: stop everything if anything plays, otherwise play every voice.
    pub fn toggle_all(&mut self) -> Result<Vec<VoiceId>, BatchError<VoiceId>> {
        let ids = self.voice_ids();
        if self.any_playing() {
            self.stop(&ids)
        } else {
            self.play(&ids)
        }
    }

    fn for_each_voice<F>(
        &mut self,
        operation: &str,
        ids: &[VoiceId],
        mut func: F,
    ) -> Result<Vec<VoiceId>, BatchError<VoiceId>>
    where
        F: FnMut(&mut Self, VoiceId) -> Result<(), AudioError>,
    {
        if let Err(e) = self.ensure_initialized(operation) {
            return BatchError::collect(vec![], vec![e]);
        }

        let mut completed = vec![];
        let mut errors = vec![];

        for &id in ids {
            match func(&mut *self, id) {
                Ok(()) => completed.push(id),
                Err(e) => {
                    log::error!("{}({}) failed: {}", operation, id, e);
                    errors.push(e);
                }
            }
        }

        BatchError::collect(completed, errors)
    }

    fn start_voice(&mut self, id: VoiceId) -> Result<(), AudioError> {
        let now = self.backend.current_time();
        let voice = match self.voices.get_mut(&id) {
            Some(voice) => voice,
            None => return Err(AudioError::NotFound(id)),
        };

        if voice.is_playing() {
            return Ok(());
        }

        self.backend.connect(voice.oscillator, voice.gain)?;
        voice.begin_time = now;
        voice.elapsed_periods = 0;
        voice.timer = Some(self.timer.set_interval(voice.spec.time_constant, now));

        let gain = voice.gain;
        let amplitude = voice.spec.initial_amplitude as f32;
        // schedule the first ramp right away so the envelope starts at t = 0
        let armed = match self.backend.set_value_at_time(gain, amplitude, now) {
            Ok(()) => self.decay_tick(id).map(|_| ()),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = armed {
            self.abort_start(id, now);
            return Err(e);
        }

        Ok(())
    }

    // undo a partial start_voice, leaving the voice stopped
    fn abort_start(&mut self, id: VoiceId, now: f64) {
        let voice = match self.voices.get_mut(&id) {
            Some(voice) => voice,
            None => return,
        };

        if let Some(timer) = voice.timer.take() {
            self.timer.clear_interval(timer);
        }
        voice.elapsed_periods = 0;

        let cancelled = self.backend.cancel_scheduled_values(voice.gain, now);
        log_teardown(id, "cancel", cancelled);
        let disconnected = self
            .backend
            .disconnect(voice.oscillator, Some(voice.gain));
        log_teardown(id, "disconnect oscillator", disconnected);
    }

    fn stop_voice(&mut self, id: VoiceId) -> Result<(), AudioError> {
        let now = self.backend.current_time();
        let voice = match self.voices.get_mut(&id) {
            Some(voice) => voice,
            None => return Err(AudioError::NotFound(id)),
        };

        let timer = match voice.timer {
            Some(timer) => timer,
            None => return Ok(()),
        };

        self.backend.cancel_scheduled_values(voice.gain, now)?;
        self.backend.disconnect(voice.oscillator, Some(voice.gain))?;
        self.timer.clear_interval(timer);
        voice.timer = None;
        voice.elapsed_periods = 0;

        Ok(())
    }

    /// Re-arm the gain ramp of a playing voice when a new time constant has started.
    ///
    /// Timers may fire early, late or twice, so the number of elapsed periods is derived from the
    /// audio clock. A ramp is scheduled only when it advances the envelope by exactly one period:
    /// it starts from the current gain and reaches `A * e^-n` one time constant later. Below the
    /// decay floor nothing is scheduled and the voice holds its last, inaudible, gain.
    ///
    /// A voice whose ticks fell more than a period behind the clock (e.g. a time constant shorter
    /// than the timer resolution) can never pass that check. Once its envelope has passed the
    /// floor it fades to the floor within one time constant and reports [`DecayStep::Floored`].
    pub fn decay_tick(&mut self, id: VoiceId) -> Result<DecayStep, AudioError> {
        self.ensure_initialized("decay_tick")?;
        let floor = self.options.decay_floor;
        let now = self.backend.current_time();

        let voice = match self.voices.get_mut(&id) {
            Some(voice) => voice,
            None => return Err(AudioError::NotFound(id)),
        };

        if !voice.is_playing() {
            return Ok(DecayStep::Idle);
        }

        let time_constant = voice.spec.time_constant;
        let offset = now - voice.begin_time;
        let gain = voice.gain;
        // periods elapsed once a ramp scheduled now would complete
        let target_periods = ((offset / time_constant).round().max(0.) as u64).saturating_add(1);
        let target = voice.amplitude_after(target_periods);

        if target_periods != voice.elapsed_periods.saturating_add(1) {
            let audible = voice.amplitude_after(voice.elapsed_periods) >= floor;
            if !audible || target >= floor {
                return Ok(DecayStep::Skipped);
            }

            voice.elapsed_periods = target_periods;
            log::info!(
                "voice {} missed its ticks, fading to the decay floor after {} time constants",
                id,
                target_periods
            );
            self.ramp_gain(gain, floor, now, now + time_constant)?;
            return Ok(DecayStep::Floored {
                periods: target_periods,
            });
        }

        voice.elapsed_periods = target_periods;
        if target < floor {
            log::info!(
                "voice {} reached the decay floor after {} time constants",
                id,
                target_periods
            );
            return Ok(DecayStep::Floored {
                periods: target_periods,
            });
        }

        let end_time = voice.begin_time + offset + time_constant;
        let snapshot = self.ramp_gain(gain, target, now, end_time)?;

        log::debug!(
            "voice {}: {:.3} s to {:.3} s, gain {} to {} (e^-{})",
            id,
            offset,
            offset + time_constant,
            snapshot,
            target,
            target_periods
        );

        Ok(DecayStep::Ramped {
            periods: target_periods,
            target,
            end_time,
        })
    }

    // hold the current gain at `now`, then ramp exponentially to `target`
    fn ramp_gain(
        &mut self,
        gain: NodeId,
        target: f64,
        now: f64,
        end_time: f64,
    ) -> Result<f32, AudioError> {
        let snapshot = self.backend.gain_value_at(gain, now)?;
        self.backend.set_value_at_time(gain, snapshot, now)?;
        self.backend
            .exponential_ramp_to_value_at_time(gain, target as f32, end_time)?;
        Ok(snapshot)
    }

    /// Dispatch expired decay timers, returns the number of ticks performed.
    ///
    /// Meant to be called regularly from the host event loop.
    pub fn run_pending_timers(&mut self) -> usize {
        if !self.is_initialized() {
            return 0;
        }

        let now = self.backend.current_time();
        let mut ticks = 0;

        for handle in self.timer.poll_expired(now) {
            let owner = self
                .voices
                .values()
                .find(|voice| voice.timer == Some(handle))
                .map(|voice| voice.id);

            match owner {
                Some(id) => match self.decay_tick(id) {
                    Ok(_) => ticks += 1,
                    Err(e) => log::error!("decay tick of voice {} failed: {}", id, e),
                },
                None => {
                    log::warn!("dropping orphaned timer {:?}", handle);
                    self.timer.clear_interval(handle);
                }
            }
        }

        ticks
    }

    pub fn is_playing(&self, id: VoiceId) -> bool {
        self.voices.get(&id).map_or(false, Voice::is_playing)
    }

    pub fn any_playing(&self) -> bool {
        self.voices.values().any(Voice::is_playing)
    }

    /// Envelope amplitude right now, following the continuous decay law (0 when stopped)
    pub fn current_amplitude(&self, id: VoiceId) -> Result<f64, AudioError> {
        self.ensure_initialized("current_amplitude")?;
        let now = self.backend.current_time();
        Ok(self.voice(id)?.amplitude_at(now))
    }

    /// Summed waveform of the given voices right now, for drawing. Unknown ids are skipped.
    pub fn current_signal(&self, ids: &[VoiceId]) -> Result<f64, AudioError> {
        self.ensure_initialized("current_signal")?;
        let now = self.backend.current_time();

        Ok(ids
            .iter()
            .filter_map(|&id| self.voice(id).ok())
            .map(|voice| voice.signal_at(now, 1.))
            .sum())
    }

    /// Summed waveform of every voice right now
    pub fn current_signal_all(&self) -> Result<f64, AudioError> {
        self.slowed_signal_all(1.)
    }

    /// Summed waveform of every voice with time stretched by `slowdown`, so audio-rate waves can
    /// be drawn at a visible speed. The envelope itself is not slowed down.
    pub fn slowed_signal_all(&self, slowdown: f64) -> Result<f64, AudioError> {
        self.ensure_initialized("slowed_signal_all")?;
        let now = self.backend.current_time();

        Ok(self
            .voices
            .values()
            .map(|voice| voice.signal_at(now, slowdown))
            .sum())
    }

    /// Ids of all registered voices, in creation order
    pub fn voice_ids(&self) -> Vec<VoiceId> {
        self.voices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn tone_spec(&self, id: VoiceId) -> Result<ToneSpec, AudioError> {
        self.voice(id).map(|voice| voice.spec)
    }

    pub fn tone_specs(&self) -> Vec<(VoiceId, ToneSpec)> {
        self.voices
            .values()
            .map(|voice| (voice.id, voice.spec))
            .collect()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.voices.values().map(|v| v.spec.frequency).collect()
    }

    pub fn initial_amplitudes(&self) -> Vec<f64> {
        self.voices
            .values()
            .map(|v| v.spec.initial_amplitude)
            .collect()
    }

    pub fn time_constants(&self) -> Vec<f64> {
        self.voices.values().map(|v| v.spec.time_constant).collect()
    }

    /// Whole time constants the envelope has been ramped through (0 when stopped)
    pub fn elapsed_periods(&self, id: VoiceId) -> Result<u64, AudioError> {
        self.voice(id).map(|voice| voice.elapsed_periods)
    }

    /// Clock reading at which the voice last started playing
    pub fn begin_time(&self, id: VoiceId) -> Result<f64, AudioError> {
        self.voice(id).map(|voice| voice.begin_time)
    }
}

fn log_teardown(id: VoiceId, step: &str, result: Result<(), BackendError>) {
    if let Err(e) = result {
        log::warn!("teardown of voice {}: {} failed: {}", id, step, e);
    }
}
