use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use crate::context::NodeId;
use crate::param::AutomationTimeline;

/// Audio processing performed by a node of the [`Graph`]
#[derive(Clone, Debug)]
pub(crate) enum Node {
    /// final mixing point, passes its inputs through
    Destination,
    /// sine source, silent outside of `[start, stop)`
    Oscillator {
        frequency: f64,
        start: Option<f64>,
        stop: Option<f64>,
    },
    /// scales its summed inputs by an automated gain
    Gain { gain: AutomationTimeline },
}

impl Node {
    fn process(&self, input: f32, t: f64) -> f32 {
        match self {
            Node::Destination => input,
            Node::Oscillator {
                frequency,
                start,
                stop,
            } => match start {
                Some(start) if t >= *start && stop.map_or(true, |stop| t < stop) => {
                    (2. * PI * frequency * (t - start)).sin() as f32
                }
                _ => 0.,
            },
            Node::Gain { gain } => input * gain.value_at(t),
        }
    }
}

/// Node graph of an offline context, rooted at the destination
#[derive(Debug)]
pub(crate) struct Graph {
    nodes: HashMap<NodeId, Node>,

    // connections, from output to input
    edges: HashSet<(NodeId, NodeId)>,

    // nodes reachable from the destination, sources first
    ordered: Vec<NodeId>,
    values: HashMap<NodeId, f32>,
}

impl Graph {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(Self::ROOT, Node::Destination);

        Graph {
            nodes,
            edges: HashSet::new(),
            ordered: vec![Self::ROOT],
            values: HashMap::new(),
        }
    }

    /// Number of nodes, the destination included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_node(&mut self, index: NodeId, node: Node) {
        self.nodes.insert(index, node);
    }

    pub fn remove_node(&mut self, index: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&index)?;
        self.edges.retain(|&(s, d)| s != index && d != index);
        self.order_nodes();
        Some(node)
    }

    pub fn node(&self, index: NodeId) -> Option<&Node> {
        self.nodes.get(&index)
    }

    pub fn node_mut(&mut self, index: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&index)
    }

    pub fn has_edge(&self, source: NodeId, dest: NodeId) -> bool {
        self.edges.contains(&(source, dest))
    }

    pub fn add_edge(&mut self, source: NodeId, dest: NodeId) {
        self.edges.insert((source, dest));

        self.order_nodes();
    }

    pub fn remove_edge(&mut self, source: NodeId, dest: NodeId) -> bool {
        let removed = self.edges.remove(&(source, dest));

        self.order_nodes();
        removed
    }

    pub fn remove_edges_from(&mut self, source: NodeId) {
        self.edges.retain(|&(s, _d)| s != source);

        self.order_nodes();
    }

    fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |&&(_s, d)| d == node)
            .map(|&(s, _d)| s)
    }

    fn visit(&self, n: NodeId, marked: &mut Vec<NodeId>, ordered: &mut Vec<NodeId>) {
        if marked.contains(&n) {
            return;
        }
        marked.push(n);
        let children: Vec<_> = self.children(n).collect();
        children
            .into_iter()
            .for_each(|c| self.visit(c, marked, ordered));
        ordered.push(n);
    }

    fn order_nodes(&mut self) {
        let mut ordered = std::mem::take(&mut self.ordered);
        ordered.clear();
        let mut marked = Vec::with_capacity(self.nodes.len());

        self.visit(Self::ROOT, &mut marked, &mut ordered);

        self.ordered = ordered;
    }

    /// Output of the destination at time `t`
    pub fn render_sample(&mut self, t: f64) -> f32 {
        // split (mut) borrows
        let ordered = &self.ordered;
        let edges = &self.edges;
        let nodes = &self.nodes;
        let values = &mut self.values;

        values.clear();

        for index in ordered.iter() {
            let input: f32 = edges
                .iter()
                .filter(|&&(_s, d)| d == *index)
                .map(|(s, _d)| values.get(s).copied().unwrap_or(0.))
                .sum();

            let output = nodes.get(index).map_or(0., |node| node.process(input, t));
            values.insert(*index, output);
        }

        values.get(&Self::ROOT).copied().unwrap_or(0.)
    }
}
