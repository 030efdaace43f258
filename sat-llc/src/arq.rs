//! Selective-repeat ARQ on top of the framing codec.
//!
//! The sender keeps every frame of its window until it is acknowledged or has
//! exhausted its retransmissions. The receiver reorders within a window of the
//! same size and acknowledges with a cumulative base plus a 64-bit bitmap.

use crate::codec;
use crate::config::ArqConfig;
use crate::error::LlcError;
use crate::frame::{Frame, SelectiveAck};
use crate::protocol::{FlowId, FragmentKind, SEQUENCE_SPACE, SEQUENCED_HEADER_LEN, SeqNo};
use crate::queue::LlcQueue;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    InFlight,
    Acked,
    Dropped,
}

/// A transmitted frame held for retransmission.
#[derive(Debug, Clone)]
struct TxSlot {
    frame: Frame,
    retransmissions: u32,
    deadline: Instant,
    state: SlotState,
}

/// Send side of one ARQ flow.
#[derive(Debug)]
pub struct ArqSender {
    flow_id: FlowId,
    config: ArqConfig,
    next_seq: SeqNo,
    /// Sequence number of `slots[0]` (lowest unacknowledged).
    low: SeqNo,
    slots: VecDeque<TxSlot>,
    retransmission_count: u64,
}

impl ArqSender {
    pub fn new(flow_id: FlowId, config: ArqConfig) -> Self {
        Self {
            flow_id,
            config,
            next_seq: SeqNo(0),
            low: SeqNo(0),
            slots: VecDeque::new(),
            retransmission_count: 0,
        }
    }

    /// Serves one opportunity: expired retransmissions first (oldest deadline first),
    /// then new data from `queue` if the window has room.
    ///
    /// Frames whose retransmissions are exhausted are dropped and their sequence
    /// numbers pushed to `lost`.
    pub fn notify_tx_opportunity(
        &mut self,
        queue: &mut LlcQueue,
        opportunity_bytes: usize,
        now: Instant,
        lost: &mut Vec<SeqNo>,
    ) -> Option<Frame> {
        self.expire(now, lost);

        let mut expired: SmallVec<[(Instant, usize); 8]> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::InFlight && s.deadline <= now)
            .map(|(i, s)| (s.deadline, i))
            .collect();
        expired.sort_unstable();

        let timer = self.config.retransmission_timer();
        for (_, idx) in expired {
            let slot = &mut self.slots[idx];
            if slot.frame.len() <= opportunity_bytes {
                slot.retransmissions += 1;
                slot.deadline = now + timer;
                self.retransmission_count += 1;
                debug!(
                    flow = %self.flow_id,
                    seq = ?slot.frame.header.seq,
                    attempt = slot.retransmissions,
                    "retransmitting frame"
                );
                return Some(slot.frame.clone());
            }
        }

        if self.slots.len() >= self.config.window_size as usize {
            trace!(flow = %self.flow_id, low = %self.low, "transmit window full");
            return None;
        }

        let fragment = codec::encode(queue, opportunity_bytes, SEQUENCED_HEADER_LEN, true)?;
        let seq = self.next_seq;
        self.next_seq = seq.wrapping_add(1);
        let frame = Frame::data(self.flow_id, fragment.kind, Some(seq), fragment.payload);
        self.slots.push_back(TxSlot {
            frame: frame.clone(),
            retransmissions: 0,
            deadline: now + timer,
            state: SlotState::InFlight,
        });
        Some(frame)
    }

    /// Applies a selective acknowledgement, returning how many frames it newly covered.
    pub fn on_ack(&mut self, ack: &SelectiveAck) -> usize {
        let mut newly_acked = 0;
        let low = self.low;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.state == SlotState::InFlight && ack.acknowledges(low.wrapping_add(i as u8)) {
                slot.state = SlotState::Acked;
                newly_acked += 1;
            }
        }
        self.advance_low();
        newly_acked
    }

    /// Drops expired frames that have no retransmissions left.
    ///
    /// Expired frames with retransmissions left keep waiting for an opportunity.
    pub fn tick(&mut self, now: Instant, lost: &mut Vec<SeqNo>) {
        self.expire(now, lost);
    }

    fn expire(&mut self, now: Instant, lost: &mut Vec<SeqNo>) {
        let low = self.low;
        let max = self.config.max_retransmissions;
        let mut any = false;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.state == SlotState::InFlight && slot.deadline <= now && slot.retransmissions >= max
            {
                let seq = low.wrapping_add(i as u8);
                debug!(
                    flow = %self.flow_id,
                    seq = %seq,
                    retransmissions = slot.retransmissions,
                    "retransmission limit exceeded, dropping frame"
                );
                slot.state = SlotState::Dropped;
                lost.push(seq);
                any = true;
            }
        }
        if any {
            self.advance_low();
        }
    }

    fn advance_low(&mut self) {
        while self
            .slots
            .front()
            .is_some_and(|s| s.state != SlotState::InFlight)
        {
            self.slots.pop_front();
            self.low = self.low.wrapping_add(1);
        }
    }

    /// Number of unacknowledged frames.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight)
            .count()
    }

    pub fn window_has_room(&self) -> bool {
        self.slots.len() < self.config.window_size as usize
    }

    /// Whether an expired frame is waiting for an opportunity.
    pub fn has_pending_retransmission(&self, now: Instant) -> bool {
        self.slots
            .iter()
            .any(|s| s.state == SlotState::InFlight && s.deadline <= now)
    }

    /// Bytes of expired frames waiting for retransmission.
    pub fn pending_retransmission_bytes(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight && s.deadline <= now)
            .map(|s| s.frame.len())
            .sum()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight)
            .map(|s| s.deadline)
            .min()
    }

    pub fn in_flight_seqs(&self) -> Vec<SeqNo> {
        let low = self.low;
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::InFlight)
            .map(|(i, _)| low.wrapping_add(i as u8))
            .collect()
    }

    pub fn low_water_mark(&self) -> SeqNo {
        self.low
    }

    pub fn next_seq(&self) -> SeqNo {
        self.next_seq
    }

    pub fn retransmission_count(&self) -> u64 {
        self.retransmission_count
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.low = self.next_seq;
    }
}

/// A frame released by the receiver in sequence order.
pub type InOrderFragment = (FragmentKind, Vec<u8>);

/// Outcome of a receiver timer check.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RxTimerOutcome {
    /// Missing sequence numbers given up on, oldest first.
    pub skipped: Vec<SeqNo>,
    pub ack: Option<SelectiveAck>,
}

/// Receive side of one ARQ flow.
#[derive(Debug)]
pub struct ArqReceiver {
    flow_id: FlowId,
    config: ArqConfig,
    expected: SeqNo,
    /// `reorder[i]` holds sequence number `expected + i`. Slot 0 is always empty.
    reorder: VecDeque<Option<InOrderFragment>>,
    /// When the current hole at `expected` was first observed.
    hole_since: Option<Instant>,
    unacked_in_order: u32,
    ack_pending_since: Option<Instant>,
}

impl ArqReceiver {
    pub fn new(flow_id: FlowId, config: ArqConfig) -> Self {
        Self {
            flow_id,
            config,
            expected: SeqNo(0),
            reorder: VecDeque::new(),
            hole_since: None,
            unacked_in_order: 0,
            ack_pending_since: None,
        }
    }

    /// Processes one DATA frame.
    ///
    /// Frames that become in-order are pushed to `deliver`. Returns the
    /// acknowledgement to send now, if any.
    pub fn on_data(
        &mut self,
        seq: SeqNo,
        kind: FragmentKind,
        payload: Vec<u8>,
        now: Instant,
        deliver: &mut Vec<InOrderFragment>,
    ) -> Result<Option<SelectiveAck>, LlcError> {
        let window = self.config.window_size as usize;
        let offset = seq.wrapping_sub(self.expected) as usize;

        if offset == 0 {
            self.reorder.pop_front();
            self.expected = self.expected.wrapping_add(1);
            deliver.push((kind, payload));
            self.flush(deliver);
            self.hole_since = self.has_buffered().then_some(now);

            self.unacked_in_order += 1;
            self.ack_pending_since.get_or_insert(now);
            if self.unacked_in_order >= self.config.ack_every {
                return Ok(Some(self.take_ack()));
            }
            return Ok(None);
        }

        if offset < window {
            if self.reorder.len() <= offset {
                self.reorder.resize(offset + 1, None);
            }
            if self.reorder[offset].is_some() {
                trace!(flow = %self.flow_id, seq = %seq, "duplicate of buffered frame");
            } else {
                self.reorder[offset] = Some((kind, payload));
                self.hole_since.get_or_insert(now);
            }
            return Ok(Some(self.take_ack()));
        }

        if offset < SEQUENCE_SPACE / 2 {
            return Err(LlcError::SequenceOutOfBounds {
                seq,
                expected: self.expected,
            });
        }

        trace!(flow = %self.flow_id, seq = %seq, "duplicate of delivered frame");
        Ok(Some(self.take_ack()))
    }

    /// Fires the delayed acknowledgement and gives up on a hole that has waited
    /// longer than the receive waiting time.
    pub fn tick(&mut self, now: Instant, deliver: &mut Vec<InOrderFragment>) -> RxTimerOutcome {
        let mut outcome = RxTimerOutcome::default();

        if let Some(since) = self.hole_since
            && now >= since + self.config.rx_waiting_time()
            && self.has_buffered()
        {
            while self.reorder.front().is_some_and(Option::is_none) {
                self.reorder.pop_front();
                outcome.skipped.push(self.expected);
                self.expected = self.expected.wrapping_add(1);
            }
            debug!(
                flow = %self.flow_id,
                skipped = outcome.skipped.len(),
                expected = %self.expected,
                "receive waiting time elapsed, skipping missing frames"
            );
            self.flush(deliver);
            self.hole_since = self.has_buffered().then_some(now);
            outcome.ack = Some(self.take_ack());
        }

        if outcome.ack.is_none()
            && let Some(pending) = self.ack_pending_since
            && now >= pending + self.config.max_ack_delay()
        {
            outcome.ack = Some(self.take_ack());
        }

        outcome
    }

    fn flush(&mut self, deliver: &mut Vec<InOrderFragment>) {
        while let Some(Some(_)) = self.reorder.front() {
            if let Some(Some(fragment)) = self.reorder.pop_front() {
                deliver.push(fragment);
            }
            self.expected = self.expected.wrapping_add(1);
        }
    }

    fn has_buffered(&self) -> bool {
        self.reorder.iter().any(Option::is_some)
    }

    fn take_ack(&mut self) -> SelectiveAck {
        self.unacked_in_order = 0;
        self.ack_pending_since = None;
        SelectiveAck {
            flow_id: self.flow_id,
            base: self.expected,
            bitmask: self.bitmap(),
        }
    }

    fn bitmap(&self) -> u64 {
        self.reorder
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, slot)| slot.is_some())
            .fold(0u64, |mask, (i, _)| mask | (1u64 << (i - 1)))
    }

    pub fn expected(&self) -> SeqNo {
        self.expected
    }

    /// Number of frames held for reordering.
    pub fn buffered(&self) -> usize {
        self.reorder.iter().filter(|s| s.is_some()).count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let hole = self
            .hole_since
            .filter(|_| self.has_buffered())
            .map(|since| since + self.config.rx_waiting_time());
        let ack = self
            .ack_pending_since
            .map(|since| since + self.config.max_ack_delay());
        match (hole, ack) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn clear(&mut self) {
        self.reorder.clear();
        self.hole_since = None;
        self.unacked_in_order = 0;
        self.ack_pending_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_marks_buffered_successors() {
        let mut rx = ArqReceiver::new(FlowId(1), ArqConfig::default());
        let now = Instant::now();
        let mut out = Vec::new();
        rx.on_data(SeqNo(2), FragmentKind::Full, vec![2], now, &mut out)
            .unwrap();
        let ack = rx
            .on_data(SeqNo(4), FragmentKind::Full, vec![4], now, &mut out)
            .unwrap()
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(ack.base, SeqNo(0));
        assert_eq!(ack.bitmask, 0b1010);
    }
}
