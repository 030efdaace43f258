use crate::error::LlcError;
use crate::protocol::FlowId;
use std::collections::VecDeque;
use std::sync::Arc;

/// A state change of one flow queue, reported synchronously to every observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEvent {
    pub flow_id: FlowId,
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub packets_before: usize,
    pub packets_after: usize,
}

impl QueueEvent {
    /// The first unit was buffered into an empty queue.
    pub fn became_non_empty(&self) -> bool {
        self.packets_before == 0 && self.packets_after > 0
    }

    /// The last buffered byte left the queue.
    pub fn became_empty(&self) -> bool {
        self.packets_before > 0 && self.packets_after == 0
    }
}

/// Subscriber to queue state changes (backpressure, capacity requests).
pub trait QueueObserver: Send + Sync {
    fn on_queue_event(&self, event: &QueueEvent);
}

#[derive(Debug)]
struct QueuedUnit {
    data: Vec<u8>,
    /// Bytes of `data` already handed out as leading fragments.
    consumed: usize,
}

impl QueuedUnit {
    fn remaining(&self) -> &[u8] {
        &self.data[self.consumed..]
    }
}

/// FIFO buffer of payload units for one flow.
///
/// The byte counter only covers bytes that have not been drained yet, so a
/// partially transmitted head unit counts with its residual suffix.
pub struct LlcQueue {
    flow_id: FlowId,
    units: VecDeque<QueuedUnit>,
    bytes: usize,
    max_bytes: Option<usize>,
    max_packets: Option<usize>,
    observers: Vec<Arc<dyn QueueObserver>>,
}

impl std::fmt::Debug for LlcQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlcQueue")
            .field("flow_id", &self.flow_id)
            .field("bytes", &self.bytes)
            .field("packets", &self.units.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl LlcQueue {
    pub fn new(flow_id: FlowId) -> Self {
        Self::with_limits(flow_id, None, None)
    }

    pub fn with_limits(flow_id: FlowId, max_bytes: Option<usize>, max_packets: Option<usize>) -> Self {
        Self {
            flow_id,
            units: VecDeque::new(),
            bytes: 0,
            max_bytes,
            max_packets,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn QueueObserver>) {
        self.observers.push(observer);
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn enqueue(&mut self, unit: Vec<u8>) -> Result<(), LlcError> {
        if self.max_packets.is_some_and(|max| self.units.len() + 1 > max)
            || self.max_bytes.is_some_and(|max| self.bytes + unit.len() > max)
        {
            return Err(LlcError::CapacityExceeded);
        }

        let before = self.snapshot();
        self.bytes += unit.len();
        self.units.push_back(QueuedUnit {
            data: unit,
            consumed: 0,
        });
        self.notify(before);
        Ok(())
    }

    /// Residual bytes of the head unit.
    pub fn peek(&self) -> Option<&[u8]> {
        self.units.front().map(QueuedUnit::remaining)
    }

    /// Whether the head unit has already been partially transmitted.
    pub fn front_is_partial(&self) -> bool {
        self.units.front().is_some_and(|u| u.consumed > 0)
    }

    /// Removes the head unit, returning its residual bytes.
    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        let before = self.snapshot();
        let mut unit = self.units.pop_front()?;
        let residual = if unit.consumed == 0 {
            unit.data
        } else {
            unit.data.split_off(unit.consumed)
        };
        self.bytes -= residual.len();
        self.notify(before);
        Some(residual)
    }

    /// Removes the first `n` residual bytes of the head unit.
    ///
    /// The unit itself leaves the queue once its last byte has been taken.
    pub fn dequeue_prefix(&mut self, n: usize) -> Option<Vec<u8>> {
        let remaining = self.peek()?.len();
        if n >= remaining {
            return self.dequeue();
        }

        let before = self.snapshot();
        let head = self.units.front_mut()?;
        let prefix = head.data[head.consumed..head.consumed + n].to_vec();
        head.consumed += n;
        self.bytes -= n;
        self.notify(before);
        Some(prefix)
    }

    pub fn bytes_queued(&self) -> usize {
        self.bytes
    }

    pub fn packets_queued(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Drops every untouched unit for which `keep` returns false and returns how
    /// many were dropped. A partially transmitted head unit is always kept.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[u8]) -> bool,
    {
        let before = self.snapshot();
        let mut dropped_bytes = 0;
        self.units.retain(|unit| {
            if unit.consumed > 0 || keep(&unit.data) {
                return true;
            }
            dropped_bytes += unit.data.len();
            false
        });
        let dropped = before.1 - self.units.len();
        if dropped > 0 {
            self.bytes -= dropped_bytes;
            self.notify(before);
        }
        dropped
    }

    /// Discards every buffered unit.
    pub fn clear(&mut self) {
        if self.units.is_empty() {
            return;
        }
        let before = self.snapshot();
        self.units.clear();
        self.bytes = 0;
        self.notify(before);
    }

    fn snapshot(&self) -> (usize, usize) {
        (self.bytes, self.units.len())
    }

    fn notify(&self, (bytes_before, packets_before): (usize, usize)) {
        let event = QueueEvent {
            flow_id: self.flow_id,
            bytes_before,
            bytes_after: self.bytes,
            packets_before,
            packets_after: self.units.len(),
        };
        for observer in &self.observers {
            observer.on_queue_event(&event);
        }
    }
}
