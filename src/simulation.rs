//! Deterministic discrete-event simulation driver.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  Simulation                   │
//! │                                               │
//! │  nodes: Vec<Box<dyn Node>>                    │
//! │      ▲  on_start / on_timeout / on_message    │
//! │      │                                        │
//! │  Context                                      │
//! │   ├─ EventQueue (ordered by time, sequence)   │
//! │   ├─ Network (latency, leadership)            │
//! │   └─ broadcast / schedule_timeout             │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The driver holds no protocol state: everything a run does is either a change to a node or
//! a new queue entry.

use crate::error::SimulationError;
use crate::event_queue::{Event, EventKind, EventQueue};
use crate::message::{Envelope, Message};
use crate::network::Network;
use crate::node::{Decision, Node, NodeId};
use crate::tally::quorum_size;
use crate::value::Proposal;
use log::{debug, trace};

/// How a run ended, when it did not hit a fatal error.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RunOutcome {
    /// The event queue drained within the time limit.
    Completed,
    /// The next pending event lies past the time limit. The run says nothing about the
    /// protocol's outcome.
    Inconclusive,
}

/// Statistics collected during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Timeout events delivered to nodes, stale ones included.
    pub timeouts_fired: u64,
    /// Message events delivered to nodes.
    pub messages_delivered: u64,
    /// Calls to `broadcast`.
    pub broadcasts: u64,
    /// Timers armed.
    pub timers_armed: u64,
}

/// Scheduling services handed to nodes while they handle an event.
#[derive(Debug)]
pub struct Context {
    network: Network,
    queue: EventQueue,
    quorum: usize,
    next_proposal: u64,
    stats: SimulationStats,
}

impl Context {
    pub fn new(network: Network) -> Self {
        let quorum = quorum_size(network.node_count());
        Context {
            network,
            queue: EventQueue::new(),
            quorum,
            next_proposal: 0,
            stats: SimulationStats::default(),
        }
    }

    /// Votes needed for a quorum; identical for every protocol and node in the run.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn node_count(&self) -> usize {
        self.network.node_count()
    }

    pub fn leader(&self, cycle: u64) -> NodeId {
        self.network.leader(cycle)
    }

    /// Mints a proposal that is distinct from every other proposal of this run.
    pub fn new_proposal(&mut self) -> Proposal {
        let proposal = Proposal::from_id(self.next_proposal);
        self.next_proposal += 1;
        proposal
    }

    /// Sends `message` to every node, `sender` included, each copy arriving after that
    /// destination's latency.
    pub fn broadcast(&mut self, sender: NodeId, message: Message, time: f64) {
        trace!("node {sender}: broadcast {message} at {time:.6}");
        self.stats.broadcasts += 1;
        for destination in self.network.nodes() {
            let latency = self.network.latency(sender, destination);
            self.queue.schedule(Event {
                time: time + latency,
                target: destination,
                kind: EventKind::Delivery(Envelope { sender, message }),
            });
        }
    }

    /// Arms a timer for `node` firing at `time`.
    pub fn schedule_timeout(&mut self, node: NodeId, time: f64) {
        self.stats.timers_armed += 1;
        self.queue.schedule(Event {
            time,
            target: node,
            kind: EventKind::Timeout,
        });
    }

    pub fn schedule(&mut self, event: Event) {
        self.queue.schedule(event);
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }
}

/// Per-node result of a run.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct NodeReport {
    pub id: NodeId,
    pub correct: bool,
    pub decision: Option<Decision>,
}

impl NodeReport {
    pub fn terminated(&self) -> bool {
        self.decision.is_some()
    }
}

/// A single simulation run: one network, one set of nodes, one event queue.
pub struct Simulation {
    nodes: Vec<Box<dyn Node>>,
    context: Context,
    started: bool,
}

impl Simulation {
    /// Assembles a run. `nodes[i]` must be the node with id `i`, one per network participant.
    pub fn new(network: Network, nodes: Vec<Box<dyn Node>>) -> Result<Self, SimulationError> {
        if nodes.len() != network.node_count() {
            return Err(SimulationError::NodeCountMismatch {
                network: network.node_count(),
                nodes: nodes.len(),
            });
        }
        if let Some((index, node)) = nodes.iter().enumerate().find(|(i, n)| n.id() != *i) {
            return Err(SimulationError::NodeIdMismatch {
                index,
                id: node.id(),
            });
        }

        Ok(Simulation {
            nodes,
            context: Context::new(network),
            started: false,
        })
    }

    /// Runs until the queue drains or the next event lies past `time_limit`.
    ///
    /// Start hooks are invoked on the first call only, so a run that returned
    /// [`RunOutcome::Inconclusive`] can be resumed with a larger limit.
    pub fn run(&mut self, time_limit: f64) -> Result<RunOutcome, SimulationError> {
        if !self.started {
            self.started = true;
            for node in self.nodes.iter_mut() {
                node.on_start(&mut self.context)?;
            }
        }

        while let Some(time) = self.context.queue.peek_time() {
            if time > time_limit {
                debug!(
                    "next event at {time:.6}s exceeds limit {time_limit}s, {} events pending",
                    self.context.queue.len()
                );
                return Ok(RunOutcome::Inconclusive);
            }
            let Some(event) = self.context.queue.pop() else {
                break;
            };

            self.context.stats.events_processed += 1;
            let node = &mut self.nodes[event.target];
            match &event.kind {
                EventKind::Timeout => {
                    trace!("node {}: timeout at {:.6}", event.target, event.time);
                    self.context.stats.timeouts_fired += 1;
                    node.on_timeout(&mut self.context, event.time)?;
                }
                EventKind::Delivery(envelope) => {
                    trace!(
                        "node {}: received {} from {} at {:.6}",
                        event.target,
                        envelope.message,
                        envelope.sender,
                        event.time
                    );
                    self.context.stats.messages_delivered += 1;
                    node.on_message(&mut self.context, event.time, envelope)?;
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    pub fn nodes(&self) -> &[Box<dyn Node>] {
        &self.nodes
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn stats(&self) -> &SimulationStats {
        self.context.stats()
    }

    pub fn reports(&self) -> Vec<NodeReport> {
        self.nodes
            .iter()
            .map(|node| NodeReport {
                id: node.id(),
                correct: node.is_correct(),
                decision: node.decision().copied(),
            })
            .collect()
    }

    /// Whether every correct node has decided. Failed nodes are ignored.
    pub fn all_correct_terminated(&self) -> bool {
        self.nodes
            .iter()
            .filter(|node| node.is_correct())
            .all(|node| node.is_terminated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FailedNode, Output};

    /// Broadcasts once at start.
    struct Echo {
        id: NodeId,
        output: Output,
    }

    impl Node for Echo {
        fn id(&self) -> NodeId {
            self.id
        }

        fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError> {
            let proposal = ctx.new_proposal();
            ctx.broadcast(self.id, Message::Proposal { cycle: 0, proposal }, 0.0);
            Ok(())
        }

        fn on_timeout(&mut self, _: &mut Context, _: f64) -> Result<(), SimulationError> {
            Ok(())
        }

        fn on_message(
            &mut self,
            _: &mut Context,
            _: f64,
            _: &Envelope,
        ) -> Result<(), SimulationError> {
            Ok(())
        }

        fn output(&self) -> &Output {
            &self.output
        }
    }

    /// Re-arms its timer forever.
    struct Ticker {
        id: NodeId,
        output: Output,
    }

    impl Node for Ticker {
        fn id(&self) -> NodeId {
            self.id
        }

        fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError> {
            ctx.schedule_timeout(self.id, 1.0);
            Ok(())
        }

        fn on_timeout(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
            ctx.schedule_timeout(self.id, time + 1.0);
            Ok(())
        }

        fn on_message(
            &mut self,
            _: &mut Context,
            _: f64,
            _: &Envelope,
        ) -> Result<(), SimulationError> {
            Ok(())
        }

        fn output(&self) -> &Output {
            &self.output
        }
    }

    #[test]
    fn test_broadcast_reaches_every_node_including_sender() {
        let mut ctx = Context::new(Network::constant(3, 0.5));
        let proposal = ctx.new_proposal();
        ctx.broadcast(1, Message::Proposal { cycle: 0, proposal }, 2.0);

        let targets: Vec<NodeId> = ctx.queue().iter().map(|e| e.target).collect();
        assert_eq!(targets, vec![0, 1, 2]);
        assert!(ctx.queue().iter().all(|e| e.time == 2.5));
        assert_eq!(ctx.stats().broadcasts, 1);
    }

    #[test]
    fn test_new_proposals_are_distinct() {
        let mut ctx = Context::new(Network::constant(1, 0.0));
        let a = ctx.new_proposal();
        let b = ctx.new_proposal();
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_completes_when_queue_drains() {
        let nodes: Vec<Box<dyn Node>> = (0..3)
            .map(|id| {
                Box::new(Echo {
                    id,
                    output: Output::new(),
                }) as Box<dyn Node>
            })
            .collect();
        let mut simulation = Simulation::new(Network::constant(3, 0.1), nodes).unwrap();

        assert_eq!(simulation.run(1.0).unwrap(), RunOutcome::Completed);
        assert_eq!(simulation.stats().messages_delivered, 9);
        assert_eq!(simulation.stats().events_processed, 9);
    }

    #[test]
    fn test_run_is_inconclusive_past_time_limit() {
        let nodes: Vec<Box<dyn Node>> = vec![
            Box::new(Ticker {
                id: 0,
                output: Output::new(),
            }),
            Box::new(FailedNode::new(1)),
        ];
        let mut simulation = Simulation::new(Network::constant(2, 0.0), nodes).unwrap();

        assert_eq!(simulation.run(10.0).unwrap(), RunOutcome::Inconclusive);
        assert_eq!(simulation.stats().timeouts_fired, 10);

        // Resuming picks up the pending timer.
        assert_eq!(simulation.run(12.0).unwrap(), RunOutcome::Inconclusive);
        assert_eq!(simulation.stats().timeouts_fired, 12);
        assert!(!simulation.all_correct_terminated());
    }

    #[test]
    fn test_node_id_mismatch() {
        let nodes: Vec<Box<dyn Node>> =
            vec![Box::new(FailedNode::new(1)), Box::new(FailedNode::new(0))];
        match Simulation::new(Network::constant(2, 0.0), nodes) {
            Err(SimulationError::NodeIdMismatch { index, id }) => {
                assert_eq!((index, id), (0, 1));
            }
            _ => panic!("Expected NodeIdMismatch"),
        }
    }

    #[test]
    fn test_node_count_mismatch() {
        let nodes: Vec<Box<dyn Node>> = vec![Box::new(FailedNode::new(0))];
        assert!(matches!(
            Simulation::new(Network::constant(2, 0.0), nodes),
            Err(SimulationError::NodeCountMismatch { network: 2, nodes: 1 })
        ));
    }
}
