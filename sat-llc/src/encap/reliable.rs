use crate::arq::{ArqReceiver, ArqSender, InOrderFragment};
use crate::codec::{self, Reassembler};
use crate::config::ArqConfig;
use crate::encap::{Decapsulator, Encapsulator, FlowEvent};
use crate::error::LlcError;
use crate::frame::{Frame, SelectiveAck};
use crate::protocol::{FlowId, SEQUENCED_HEADER_LEN, SeqNo};
use crate::queue::{LlcQueue, QueueObserver};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// ARQ transmit half: every frame carries a sequence number and is held until
/// acknowledged or given up on.
#[derive(Debug)]
pub struct ReliableEncapsulator {
    queue: LlcQueue,
    sender: ArqSender,
}

impl ReliableEncapsulator {
    pub fn new(queue: LlcQueue, config: ArqConfig) -> Self {
        let sender = ArqSender::new(queue.flow_id(), config);
        Self { queue, sender }
    }

    pub fn sender(&self) -> &ArqSender {
        &self.sender
    }

    fn push_losses(lost: Vec<SeqNo>, events: &mut Vec<FlowEvent>) {
        events.extend(lost.into_iter().map(FlowEvent::Lost));
    }
}

impl Encapsulator for ReliableEncapsulator {
    fn flow_id(&self) -> FlowId {
        self.queue.flow_id()
    }

    fn enqueue(&mut self, unit: Vec<u8>) -> Result<(), LlcError> {
        self.queue.enqueue(unit)
    }

    fn notify_tx_opportunity(
        &mut self,
        opportunity_bytes: usize,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Option<Frame> {
        let mut lost = Vec::new();
        let frame =
            self.sender
                .notify_tx_opportunity(&mut self.queue, opportunity_bytes, now, &mut lost);
        Self::push_losses(lost, events);
        frame
    }

    fn on_ack(&mut self, ack: &SelectiveAck) {
        let acked = self.sender.on_ack(ack);
        debug!(
            flow = %self.queue.flow_id(),
            base = %ack.base,
            acked,
            outstanding = self.sender.outstanding(),
            "acknowledgement processed"
        );
    }

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>) {
        let mut lost = Vec::new();
        self.sender.tick(now, &mut lost);
        Self::push_losses(lost, events);
    }

    fn buffered_bytes(&self, now: Instant) -> usize {
        self.queue.bytes_queued() + self.sender.pending_retransmission_bytes(now)
    }

    fn buffered_packets(&self) -> usize {
        self.queue.packets_queued()
    }

    fn min_tx_opportunity(&self) -> usize {
        codec::min_tx_opportunity(SEQUENCED_HEADER_LEN)
    }

    fn has_pending_retransmission(&self, now: Instant) -> bool {
        self.sender.has_pending_retransmission(now)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sender.next_deadline()
    }

    fn queue(&self) -> &LlcQueue {
        &self.queue
    }

    fn queue_mut(&mut self) -> &mut LlcQueue {
        &mut self.queue
    }

    fn add_observer(&mut self, observer: Arc<dyn QueueObserver>) {
        self.queue.add_observer(observer);
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.sender.clear();
    }
}

/// ARQ receive half: reorders, acknowledges and reassembles.
#[derive(Debug)]
pub struct ReliableDecapsulator {
    receiver: ArqReceiver,
    reassembler: Reassembler,
    flow_id: FlowId,
}

impl ReliableDecapsulator {
    pub fn new(flow_id: FlowId, config: ArqConfig) -> Self {
        Self {
            receiver: ArqReceiver::new(flow_id, config),
            reassembler: Reassembler::new(),
            flow_id,
        }
    }

    pub fn receiver(&self) -> &ArqReceiver {
        &self.receiver
    }

    fn reassemble(&mut self, fragments: Vec<InOrderFragment>, events: &mut Vec<FlowEvent>) {
        for (kind, payload) in fragments {
            match self.reassembler.reassemble(kind, payload) {
                Ok(Some(unit)) => events.push(FlowEvent::Delivered(unit)),
                Ok(None) => {}
                // The head of this unit was skipped.
                Err(e) => debug!(flow = %self.flow_id, ?kind, "dropping fragment: {e}"),
            }
        }
    }
}

impl Decapsulator for ReliableDecapsulator {
    fn receive_frame(
        &mut self,
        frame: Frame,
        now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Result<(), LlcError> {
        let Some(seq) = frame.header.seq else {
            return Err(LlcError::MalformedFrame(format!(
                "unsequenced frame on ARQ flow {}",
                self.flow_id
            )));
        };

        let mut in_order = Vec::new();
        let ack = self
            .receiver
            .on_data(seq, frame.header.kind, frame.payload, now, &mut in_order)?;
        self.reassemble(in_order, events);
        if let Some(ack) = ack {
            events.push(FlowEvent::SendAck(ack));
        }
        Ok(())
    }

    fn tick(&mut self, now: Instant, events: &mut Vec<FlowEvent>) {
        let mut in_order = Vec::new();
        let outcome = self.receiver.tick(now, &mut in_order);
        if !outcome.skipped.is_empty() {
            self.reassembler.discard();
        }
        events.extend(outcome.skipped.into_iter().map(FlowEvent::Skipped));
        self.reassemble(in_order, events);
        if let Some(ack) = outcome.ack {
            events.push(FlowEvent::SendAck(ack));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.receiver.next_deadline()
    }

    fn clear(&mut self) {
        self.receiver.clear();
        self.reassembler.discard();
    }
}
