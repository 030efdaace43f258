//! Per-flow transmit and receive halves.
//!
//! Every flow owns one [`FlowEncapsulator`] and one [`FlowDecapsulator`]. The base
//! variants only fragment and reassemble; the reliable variants put the ARQ
//! window between the codec and the wire.

use crate::error::LlcError;
use crate::frame::{Frame, SelectiveAck};
use crate::protocol::{FlowId, SeqNo};
use crate::queue::{LlcQueue, QueueObserver};
use std::sync::Arc;
use std::time::Instant;

pub mod base;
pub mod reliable;

pub use base::{BaseDecapsulator, BaseEncapsulator};
pub use reliable::{ReliableDecapsulator, ReliableEncapsulator};

/// Something a flow needs the dispatcher to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// A complete unit for the upper layer.
    Delivered(Vec<u8>),
    /// A frame was given up on after its last retransmission.
    Lost(SeqNo),
    /// The receiver gave up waiting for a missing frame.
    Skipped(SeqNo),
    /// An acknowledgement to send back to the peer.
    SendAck(SelectiveAck),
}

/// Transmit half of a flow.
pub trait Encapsulator {
    fn flow_id(&self) -> FlowId;

    fn enqueue(&mut self, unit: Vec<u8>) -> Result<(), LlcError>;

    /// Produces at most one frame no longer than `opportunity_bytes`.
    fn notify_tx_opportunity(
        &mut self,
        opportunity_bytes: usize,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Option<Frame>;

    fn on_ack(&mut self, ack: &SelectiveAck);

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>);

    /// Bytes waiting for an opportunity, retransmissions included.
    fn buffered_bytes(&self, now: Instant) -> usize;

    fn buffered_packets(&self) -> usize;

    /// Smallest opportunity this flow can make use of.
    fn min_tx_opportunity(&self) -> usize;

    fn has_pending_retransmission(&self, now: Instant) -> bool;

    fn next_deadline(&self) -> Option<Instant>;

    fn queue(&self) -> &LlcQueue;

    fn queue_mut(&mut self) -> &mut LlcQueue;

    fn add_observer(&mut self, observer: Arc<dyn QueueObserver>);

    /// Discards queued data and retransmission state.
    fn clear(&mut self);
}

/// Receive half of a flow.
pub trait Decapsulator {
    fn receive_frame(
        &mut self,
        frame: Frame,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Result<(), LlcError>;

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>);

    fn next_deadline(&self) -> Option<Instant>;

    /// Discards partial reassemblies and reorder state.
    fn clear(&mut self);
}

#[derive(Debug)]
pub enum FlowEncapsulator {
    Base(BaseEncapsulator),
    Reliable(ReliableEncapsulator),
}

#[derive(Debug)]
pub enum FlowDecapsulator {
    Base(BaseDecapsulator),
    Reliable(ReliableDecapsulator),
}

macro_rules! dispatch_encap {
    ($self:ident, $fn:ident $(, $args:expr)*) => {
        match $self {
            FlowEncapsulator::Base(e) => e.$fn($($args),*),
            FlowEncapsulator::Reliable(e) => e.$fn($($args),*),
        }
    };
}

macro_rules! dispatch_decap {
    ($self:ident, $fn:ident $(, $args:expr)*) => {
        match $self {
            FlowDecapsulator::Base(d) => d.$fn($($args),*),
            FlowDecapsulator::Reliable(d) => d.$fn($($args),*),
        }
    };
}

impl Encapsulator for FlowEncapsulator {
    fn flow_id(&self) -> FlowId {
        dispatch_encap!(self, flow_id)
    }

    fn enqueue(&mut self, unit: Vec<u8>) -> Result<(), LlcError> {
        dispatch_encap!(self, enqueue, unit)
    }

    fn notify_tx_opportunity(
        &mut self,
        opportunity_bytes: usize,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Option<Frame> {
        dispatch_encap!(self, notify_tx_opportunity, opportunity_bytes, now, events)
    }

    fn on_ack(&mut self, ack: &SelectiveAck) {
        dispatch_encap!(self, on_ack, ack)
    }

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>) {
        dispatch_encap!(self, tick, now, events)
    }

    fn buffered_bytes(&self, now: Instant) -> usize {
        dispatch_encap!(self, buffered_bytes, now)
    }

    fn buffered_packets(&self) -> usize {
        dispatch_encap!(self, buffered_packets)
    }

    fn min_tx_opportunity(&self) -> usize {
        dispatch_encap!(self, min_tx_opportunity)
    }

    fn has_pending_retransmission(&self, now: Instant) -> bool {
        dispatch_encap!(self, has_pending_retransmission, now)
    }

    fn next_deadline(&self) -> Option<Instant> {
        dispatch_encap!(self, next_deadline)
    }

    fn queue(&self) -> &LlcQueue {
        dispatch_encap!(self, queue)
    }

    fn queue_mut(&mut self) -> &mut LlcQueue {
        dispatch_encap!(self, queue_mut)
    }

    fn add_observer(&mut self, observer: Arc<dyn QueueObserver>) {
        dispatch_encap!(self, add_observer, observer)
    }

    fn clear(&mut self) {
        dispatch_encap!(self, clear)
    }
}

impl Decapsulator for FlowDecapsulator {
    fn receive_frame(
        &mut self,
        frame: Frame,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Result<(), LlcError> {
        dispatch_decap!(self, receive_frame, frame, now, events)
    }

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>) {
        dispatch_decap!(self, tick, now, events)
    }

    fn next_deadline(&self) -> Option<Instant> {
        dispatch_decap!(self, next_deadline)
    }

    fn clear(&mut self) {
        dispatch_decap!(self, clear)
    }
}
