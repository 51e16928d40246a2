//! Simulated network: participant ordering, leadership and message latency.

use crate::geometry::EarthPosition;
use crate::node::NodeId;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// The speed of light in a vacuum, in meters per second.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Refractive index of a typical fiber optic cable.
pub const FIBER_REFRACTIVE_INDEX: f64 = 1.4682;

/// The speed of light through a typical fiber optic cable, in meters per second.
pub fn speed_of_fiber() -> f64 {
    SPEED_OF_LIGHT / FIBER_REFRACTIVE_INDEX
}

/// A one-way message latency model.
///
/// Implementations may be randomized, hence `&mut self`. Returned latencies must be
/// non-negative and finite.
pub trait Latency {
    /// Seconds taken to deliver a message from `source` to `destination`.
    fn latency(&mut self, source: NodeId, destination: NodeId) -> f64;
}

/// Every message takes the same time to arrive, including messages a node sends to itself.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConstantLatency(pub f64);

impl Latency for ConstantLatency {
    fn latency(&mut self, _: NodeId, _: NodeId) -> f64 {
        self.0
    }
}

/// Nodes are directly connected through fiber optic cables laid along great circles.
///
/// With a non-zero `jitter`, each latency is stretched by a factor drawn uniformly from
/// `[1, 1 + jitter)`.
#[derive(Clone, Debug)]
pub struct FiberLatency {
    positions: Vec<EarthPosition>,
    jitter: f64,
    rng: ChaCha8Rng,
}

impl FiberLatency {
    pub fn new(positions: Vec<EarthPosition>) -> Self {
        Self::with_jitter(positions, 0.0, 0)
    }

    pub fn with_jitter(positions: Vec<EarthPosition>, jitter: f64, seed: u64) -> Self {
        FiberLatency {
            positions,
            jitter,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Great-circle distance between two nodes, in meters.
    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        self.positions[a].distance(&self.positions[b])
    }
}

impl Latency for FiberLatency {
    fn latency(&mut self, source: NodeId, destination: NodeId) -> f64 {
        let base = self.distance(source, destination) / speed_of_fiber();
        if self.jitter > 0.0 {
            base * (1.0 + self.rng.gen_range(0.0..self.jitter))
        } else {
            base
        }
    }
}

/// The set of participants of one simulation run.
///
/// Nodes are identified by their index; the order defines round-robin leadership.
pub struct Network {
    node_count: usize,
    latency: Box<dyn Latency>,
}

impl Network {
    pub fn new(node_count: usize, latency: Box<dyn Latency>) -> Self {
        Network {
            node_count,
            latency,
        }
    }

    /// A network of `positions.len()` nodes connected by fiber.
    pub fn fiber(positions: Vec<EarthPosition>, jitter: f64, seed: u64) -> Self {
        let node_count = positions.len();
        Network::new(
            node_count,
            Box::new(FiberLatency::with_jitter(positions, jitter, seed)),
        )
    }

    /// A network where every message arrives after exactly `latency` seconds.
    pub fn constant(node_count: usize, latency: f64) -> Self {
        Network::new(node_count, Box::new(ConstantLatency(latency)))
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// All node identifiers in leadership order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        0..self.node_count
    }

    /// The round-robin leader of `cycle`.
    pub fn leader(&self, cycle: u64) -> NodeId {
        (cycle % self.node_count as u64) as NodeId
    }

    pub fn latency(&mut self, source: NodeId, destination: NodeId) -> f64 {
        self.latency.latency(source, destination)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("node_count", &self.node_count)
            .finish()
    }
}
