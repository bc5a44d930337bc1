//! Audio backends driven by the voice scheduler

use std::fmt;

use crate::graph::{Graph, Node};
use crate::param::AutomationTimeline;
use crate::SampleRate;

/// Handle to a node living inside an [`AudioBackend`]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u64);

/// Call refused by an [`AudioBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend has not been opened yet
    NotOpen,
    /// No node with this id exists (anymore)
    UnknownNode(NodeId),
    /// The two nodes are not connected, so they cannot be disconnected
    NotConnected(NodeId, NodeId),
    /// A ramp target outside of the supported range (e.g. an exponential ramp to zero)
    Range(f32),
    /// The node does not support the requested operation in its current state
    InvalidState(&'static str),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackendError::NotOpen => write!(f, "audio backend is not open"),
            BackendError::UnknownNode(id) => write!(f, "unknown audio node {:?}", id),
            BackendError::NotConnected(from, to) => {
                write!(f, "node {:?} is not connected to {:?}", from, to)
            }
            BackendError::Range(value) => write!(
                f,
                "RangeError: ramp target {:+e} should not be in the range ({:+e}, {:+e})",
                value,
                -f32::MIN_POSITIVE,
                f32::MIN_POSITIVE
            ),
            BackendError::InvalidState(msg) => write!(f, "InvalidStateError: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Audio graph operations the voice scheduler relies on
///
/// Mirrors the subset of an `AudioContext` needed to play sine voices through automated gain
/// nodes. All times are in seconds on the clock returned by [`current_time`](Self::current_time).
pub trait AudioBackend {
    /// Acquire the audio device. Platforms may only allow this after a user gesture.
    fn open(&mut self) -> Result<(), BackendError>;

    fn is_open(&self) -> bool;

    /// Monotonic clock of the audio device
    fn current_time(&self) -> f64;

    /// Node representing the audio output device
    fn destination(&self) -> NodeId;

    /// Creates a sine oscillator. It emits silence until [`start`](Self::start) is called.
    fn create_oscillator(&mut self, frequency: f64) -> Result<NodeId, BackendError>;

    /// Creates a gain node, its gain defaults to 1.
    fn create_gain(&mut self) -> Result<NodeId, BackendError>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), BackendError>;

    /// Disconnects `from` from `to`, or from every destination when `to` is `None`.
    fn disconnect(&mut self, from: NodeId, to: Option<NodeId>) -> Result<(), BackendError>;

    fn start(&mut self, node: NodeId) -> Result<(), BackendError>;

    fn stop(&mut self, node: NodeId) -> Result<(), BackendError>;

    /// Frees a node, it may not be used afterwards.
    fn release(&mut self, node: NodeId) -> Result<(), BackendError>;

    fn set_value_at_time(
        &mut self,
        gain: NodeId,
        value: f32,
        start_time: f64,
    ) -> Result<(), BackendError>;

    /// Exponential ramp from the previous scheduled value, reaching `value` at `end_time`
    fn exponential_ramp_to_value_at_time(
        &mut self,
        gain: NodeId,
        value: f32,
        end_time: f64,
    ) -> Result<(), BackendError>;

    fn cancel_scheduled_values(&mut self, gain: NodeId, cancel_time: f64)
        -> Result<(), BackendError>;

    /// Gain value at a given time, as the automation curve computes it
    fn gain_value_at(&self, gain: NodeId, time: f64) -> Result<f32, BackendError>;
}

/// Options for constructing an [`OfflineContext`]
#[derive(Clone, Debug)]
pub struct OfflineContextOptions {
    pub sample_rate: SampleRate,
}

impl Default for OfflineContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate(44_100),
        }
    }
}

/// Number of calls received per automation or routing operation
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct ContextStats {
    pub set_value_calls: usize,
    pub ramp_calls: usize,
    pub cancel_calls: usize,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
}

/// The OfflineContext doesn't render the audio to the device hardware. Its clock only moves
/// when told to, either by [`advance`](Self::advance) or by rendering samples.
pub struct OfflineContext {
    /// sample rate in Hertz
    sample_rate: SampleRate,
    /// number of frames played
    frames_played: u64,
    /// incrementing id to assign to audio nodes
    node_id_inc: u64,
    open: bool,
    graph: Graph,
    stats: ContextStats,
}

impl Default for OfflineContext {
    fn default() -> Self {
        Self::new(OfflineContextOptions::default())
    }
}

impl OfflineContext {
    pub fn new(options: OfflineContextOptions) -> Self {
        Self {
            sample_rate: options.sample_rate,
            frames_played: 0,
            node_id_inc: 1,
            open: false,
            graph: Graph::new(),
            stats: ContextStats::default(),
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Move the clock forward without rendering
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds.max(0.) * self.sample_rate.0 as f64).round() as u64;
        self.frames_played += frames;
    }

    /// Render the next `frames` mono samples, advancing the clock accordingly
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let sample_rate = self.sample_rate.0 as f64;
        let start = self.frames_played;

        let output = (0..frames as u64)
            .map(|i| {
                let t = (start + i) as f64 / sample_rate;
                self.graph.render_sample(t)
            })
            .collect();

        self.frames_played += frames as u64;
        output
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.has_edge(from, to)
    }

    /// Number of live nodes, not counting the destination
    pub fn node_count(&self) -> usize {
        self.graph.len() - 1
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.open {
            Ok(())
        } else {
            Err(BackendError::NotOpen)
        }
    }

    fn register(&mut self, node: Node) -> Result<NodeId, BackendError> {
        self.check_open()?;

        let id = NodeId(self.node_id_inc);
        self.node_id_inc += 1;
        self.graph.add_node(id, node);

        Ok(id)
    }

    fn check_node(&self, node: NodeId) -> Result<(), BackendError> {
        self.check_open()?;
        match self.graph.node(node) {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownNode(node)),
        }
    }

    fn gain_mut(&mut self, node: NodeId) -> Result<&mut AutomationTimeline, BackendError> {
        self.check_open()?;
        match self.graph.node_mut(node) {
            Some(Node::Gain { gain }) => Ok(gain),
            Some(_) => Err(BackendError::InvalidState("node has no gain parameter")),
            None => Err(BackendError::UnknownNode(node)),
        }
    }

    fn set_oscillator_time(&mut self, node: NodeId, stop_time: bool) -> Result<(), BackendError> {
        self.check_open()?;
        let now = self.current_time();

        match self.graph.node_mut(node) {
            Some(Node::Oscillator { start, stop, .. }) => {
                if stop_time {
                    if start.is_none() {
                        return Err(BackendError::InvalidState("cannot stop before start"));
                    }
                    *stop = Some(now);
                } else {
                    if start.is_some() {
                        return Err(BackendError::InvalidState("cannot start more than once"));
                    }
                    *start = Some(now);
                }
                Ok(())
            }
            Some(_) => Err(BackendError::InvalidState("node is not a scheduled source")),
            None => Err(BackendError::UnknownNode(node)),
        }
    }
}

impl AudioBackend for OfflineContext {
    fn open(&mut self) -> Result<(), BackendError> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    /// This is the time in seconds of the sample frame immediately following the last rendered
    /// sample-frame.
    fn current_time(&self) -> f64 {
        self.frames_played as f64 / self.sample_rate.0 as f64
    }

    fn destination(&self) -> NodeId {
        Graph::ROOT
    }

    fn create_oscillator(&mut self, frequency: f64) -> Result<NodeId, BackendError> {
        self.register(Node::Oscillator {
            frequency,
            start: None,
            stop: None,
        })
    }

    fn create_gain(&mut self) -> Result<NodeId, BackendError> {
        self.register(Node::Gain {
            gain: AutomationTimeline::new(1., f32::MIN, f32::MAX),
        })
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), BackendError> {
        self.check_node(from)?;
        self.check_node(to)?;
        self.stats.connect_calls += 1;
        self.graph.add_edge(from, to);
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, to: Option<NodeId>) -> Result<(), BackendError> {
        self.check_node(from)?;
        self.stats.disconnect_calls += 1;

        match to {
            Some(to) => {
                if !self.graph.remove_edge(from, to) {
                    return Err(BackendError::NotConnected(from, to));
                }
            }
            None => self.graph.remove_edges_from(from),
        }

        Ok(())
    }

    fn start(&mut self, node: NodeId) -> Result<(), BackendError> {
        self.set_oscillator_time(node, false)
    }

    fn stop(&mut self, node: NodeId) -> Result<(), BackendError> {
        self.set_oscillator_time(node, true)
    }

    fn release(&mut self, node: NodeId) -> Result<(), BackendError> {
        self.check_node(node)?;
        if node == Graph::ROOT {
            return Err(BackendError::InvalidState("cannot release the destination"));
        }
        self.graph.remove_node(node);
        Ok(())
    }

    fn set_value_at_time(
        &mut self,
        gain: NodeId,
        value: f32,
        start_time: f64,
    ) -> Result<(), BackendError> {
        self.gain_mut(gain)?.set_value_at_time(value, start_time);
        self.stats.set_value_calls += 1;
        Ok(())
    }

    fn exponential_ramp_to_value_at_time(
        &mut self,
        gain: NodeId,
        value: f32,
        end_time: f64,
    ) -> Result<(), BackendError> {
        self.gain_mut(gain)?
            .exponential_ramp_to_value_at_time(value, end_time)?;
        self.stats.ramp_calls += 1;
        Ok(())
    }

    fn cancel_scheduled_values(
        &mut self,
        gain: NodeId,
        cancel_time: f64,
    ) -> Result<(), BackendError> {
        self.gain_mut(gain)?.cancel_scheduled_values(cancel_time);
        self.stats.cancel_calls += 1;
        Ok(())
    }

    fn gain_value_at(&self, gain: NodeId, time: f64) -> Result<f32, BackendError> {
        self.check_open()?;
        match self.graph.node(gain) {
            Some(Node::Gain { gain }) => Ok(gain.value_at(time)),
            Some(_) => Err(BackendError::InvalidState("node has no gain parameter")),
            None => Err(BackendError::UnknownNode(gain)),
        }
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;

    fn open_context(sample_rate: u32) -> OfflineContext {
        let mut context = OfflineContext::new(OfflineContextOptions {
            sample_rate: SampleRate(sample_rate),
        });
        context.open().unwrap();
        context
    }

    #[test]
    fn test_not_open() {
        let mut context = OfflineContext::default();
        assert!(!context.is_open());
        assert_eq!(context.create_gain(), Err(BackendError::NotOpen));
        assert_eq!(context.create_oscillator(440.), Err(BackendError::NotOpen));
        assert_eq!(context.node_count(), 0);
    }

    #[test]
    fn test_clock() {
        let mut context = open_context(100);
        assert_float_eq!(context.current_time(), 0., abs <= 0.);

        context.advance(1.5);
        assert_float_eq!(context.current_time(), 1.5, abs <= 0.);

        let output = context.render(50);
        assert_eq!(output.len(), 50);
        assert_float_eq!(context.current_time(), 2., abs <= 0.);
    }

    #[test]
    fn test_connect_disconnect() {
        let mut context = open_context(100);
        let osc = context.create_oscillator(440.).unwrap();
        let gain = context.create_gain().unwrap();
        assert_eq!(context.node_count(), 2);

        context.connect(osc, gain).unwrap();
        context.connect(gain, context.destination()).unwrap();
        assert!(context.is_connected(osc, gain));

        context.disconnect(osc, Some(gain)).unwrap();
        assert!(!context.is_connected(osc, gain));
        assert_eq!(
            context.disconnect(osc, Some(gain)),
            Err(BackendError::NotConnected(osc, gain))
        );

        context.disconnect(gain, None).unwrap();
        assert!(!context.is_connected(gain, context.destination()));

        let stats = context.stats();
        assert_eq!(stats.connect_calls, 2);
        assert_eq!(stats.disconnect_calls, 3);
    }

    #[test]
    fn test_start_stop() {
        let mut context = open_context(4);
        // a 1 Hz sine sampled at 4 Hz: 0, 1, 0, -1
        let osc = context.create_oscillator(1.).unwrap();
        context.connect(osc, context.destination()).unwrap();

        // silence before start
        assert_float_eq!(context.render(4).as_slice(), &[0.; 4][..], abs_all <= 0.);

        context.start(osc).unwrap();
        assert_eq!(
            context.start(osc),
            Err(BackendError::InvalidState("cannot start more than once"))
        );
        assert_float_eq!(
            context.render(4).as_slice(),
            &[0., 1., 0., -1.][..],
            abs_all <= 1e-6
        );

        context.stop(osc).unwrap();
        assert_float_eq!(context.render(4).as_slice(), &[0.; 4][..], abs_all <= 0.);
    }

    #[test]
    fn test_gain_automation() {
        let mut context = open_context(100);
        let gain = context.create_gain().unwrap();
        assert_float_eq!(context.gain_value_at(gain, 0.).unwrap(), 1., abs <= 0.);

        context.set_value_at_time(gain, 0.5, 0.).unwrap();
        context
            .exponential_ramp_to_value_at_time(gain, 0.05, 1.)
            .unwrap();
        assert_float_eq!(context.gain_value_at(gain, 1.).unwrap(), 0.05, abs <= 1e-6);

        assert_eq!(
            context.exponential_ramp_to_value_at_time(gain, 0., 2.),
            Err(BackendError::Range(0.))
        );

        context.cancel_scheduled_values(gain, 0.5).unwrap();
        assert_float_eq!(context.gain_value_at(gain, 1.).unwrap(), 0.5, abs <= 0.);

        let stats = context.stats();
        assert_eq!(stats.set_value_calls, 1);
        assert_eq!(stats.ramp_calls, 1);
        assert_eq!(stats.cancel_calls, 1);
    }

    #[test]
    fn test_release() {
        let mut context = open_context(100);
        let osc = context.create_oscillator(440.).unwrap();
        context.connect(osc, context.destination()).unwrap();

        context.release(osc).unwrap();
        assert_eq!(context.node_count(), 0);
        assert!(!context.is_connected(osc, context.destination()));
        assert_eq!(context.release(osc), Err(BackendError::UnknownNode(osc)));
        assert_eq!(
            context.release(context.destination()),
            Err(BackendError::InvalidState("cannot release the destination"))
        );
    }
}
