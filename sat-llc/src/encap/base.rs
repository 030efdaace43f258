use crate::codec::{self, Reassembler};
use crate::encap::{Decapsulator, Encapsulator, FlowEvent};
use crate::error::LlcError;
use crate::frame::{Frame, FrameHeader, SelectiveAck};
use crate::protocol::{BASE_HEADER_LEN, FlowId, FrameType};
use crate::queue::{LlcQueue, QueueObserver};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Unsequenced transmit half: queue plus codec.
///
/// The control flow uses it with fragmentation disabled and CONTROL frames.
#[derive(Debug)]
pub struct BaseEncapsulator {
    queue: LlcQueue,
    frame_type: FrameType,
    fragmentation: bool,
}

impl BaseEncapsulator {
    pub fn new(queue: LlcQueue) -> Self {
        Self {
            queue,
            frame_type: FrameType::Data,
            fragmentation: true,
        }
    }

    /// Transmit half of the control flow: whole CONTROL messages only.
    pub fn control(queue: LlcQueue) -> Self {
        Self {
            queue,
            frame_type: FrameType::Control,
            fragmentation: false,
        }
    }
}

impl Encapsulator for BaseEncapsulator {
    fn flow_id(&self) -> FlowId {
        self.queue.flow_id()
    }

    fn enqueue(&mut self, unit: Vec<u8>) -> Result<(), LlcError> {
        self.queue.enqueue(unit)
    }

    fn notify_tx_opportunity(
        &mut self,
        opportunity_bytes: usize,
        _now: Instant,
        _events: &mut Vec<FlowEvent>,
    ) -> Option<Frame> {
        let fragment = codec::encode(
            &mut self.queue,
            opportunity_bytes,
            BASE_HEADER_LEN,
            self.fragmentation,
        )?;
        Some(Frame {
            header: FrameHeader {
                kind: fragment.kind,
                frame_type: self.frame_type,
                flow_id: self.queue.flow_id(),
                seq: None,
            },
            payload: fragment.payload,
        })
    }

    fn on_ack(&mut self, ack: &SelectiveAck) {
        warn!(
            flow = %self.queue.flow_id(),
            base = %ack.base,
            "acknowledgement for a flow without ARQ"
        );
    }

    fn tick(&mut self, _now: Instant, _events: &mut Vec<FlowEvent>) {}

    fn buffered_bytes(&self, _now: Instant) -> usize {
        self.queue.bytes_queued()
    }

    fn buffered_packets(&self) -> usize {
        self.queue.packets_queued()
    }

    fn min_tx_opportunity(&self) -> usize {
        match self.queue.peek() {
            Some(head) if !self.fragmentation => BASE_HEADER_LEN + head.len(),
            _ => codec::min_tx_opportunity(BASE_HEADER_LEN),
        }
    }

    fn has_pending_retransmission(&self, _now: Instant) -> bool {
        false
    }

    fn next_deadline(&self) -> Option<Instant> {
        None
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
    }
}

/// Unsequenced receive half: reassembly only.
#[derive(Debug, Default)]
pub struct BaseDecapsulator {
    reassembler: Reassembler,
}

impl BaseDecapsulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reassembly_in_progress(&self) -> bool {
        self.reassembler.in_progress()
    }
}

impl Decapsulator for BaseDecapsulator {
    fn receive_frame(
        &mut self,
        frame: Frame,
        _now: Instant,
        events: &mut Vec<FlowEvent>,
    ) -> Result<(), LlcError> {
        if frame.header.seq.is_some() {
            return Err(LlcError::MalformedFrame(format!(
                "sequenced frame on flow {} without ARQ",
                frame.header.flow_id
            )));
        }
        if let Some(unit) = self.reassembler.reassemble(frame.header.kind, frame.payload)? {
            events.push(FlowEvent::Delivered(unit));
        }
        Ok(())
    }

    fn tick(&mut self, _now: Instant, _events: &mut Vec<FlowEvent>) {}

    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn clear(&mut self) {
        self.reassembler.discard();
    }
}
