use crate::event_queue::EventKind;
use crate::message::{Envelope, Message};
use crate::network::Network;
use crate::node::NodeId;
use crate::simulation::Context;
use crate::value::Proposal;

/// A context over a zero-latency network of `nodes` participants.
pub fn zero_latency_context(nodes: usize) -> Context {
    Context::new(Network::constant(nodes, 0.0))
}

pub fn envelope(sender: NodeId, message: Message) -> Envelope {
    Envelope { sender, message }
}

pub fn proposal_msg(cycle: u64, id: u64) -> Message {
    Message::Proposal {
        cycle,
        proposal: Proposal::from_id(id),
    }
}

/// Messages broadcast by `node` that are still queued, in broadcast order.
///
/// Every broadcast delivers a copy to the sender itself, so self-addressed deliveries identify
/// one broadcast each.
pub fn sent_by(ctx: &Context, node: NodeId) -> Vec<Message> {
    ctx.queue()
        .iter()
        .filter(|event| event.target == node)
        .filter_map(|event| match &event.kind {
            EventKind::Delivery(envelope) if envelope.sender == node => Some(envelope.message),
            _ => None,
        })
        .collect()
}

/// Times of the timers armed for `node` that are still queued.
pub fn timers_for(ctx: &Context, node: NodeId) -> Vec<f64> {
    ctx.queue()
        .iter()
        .filter(|event| event.target == node && event.kind == EventKind::Timeout)
        .map(|event| event.time)
        .collect()
}
