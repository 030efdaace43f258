use crate::protocol::{FlowId, PeerAddress};
use std::collections::VecDeque;

/// Snapshot of one flow as seen by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingContext {
    pub peer: PeerAddress,
    pub flow: FlowId,
    /// Queued bytes plus bytes of frames waiting for retransmission.
    pub buffered_bytes: usize,
    /// Smallest opportunity the flow can use.
    pub min_tx_opportunity: usize,
    pub has_retransmission: bool,
}

/// Picks which flow of a peer serves the next transmission opportunity.
pub trait FlowSelector {
    /// Returns one of the `candidates`, or `None` to leave the opportunity unused.
    fn next_flow(&mut self, candidates: &[SchedulingContext]) -> Option<FlowId>;

    /// Reports the size of the frame the selected flow produced.
    fn on_served(&mut self, _flow: FlowId, _bytes: usize) {}
}

/// Always serves the lowest flow id first, so control traffic goes before data.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictPriority;

impl FlowSelector for StrictPriority {
    fn next_flow(&mut self, candidates: &[SchedulingContext]) -> Option<FlowId> {
        candidates.iter().map(|c| c.flow).min()
    }
}

/// Quanta per flow id; flows beyond the table get the last entry.
const DEFAULT_QUANTA: [i64; 5] = [
    4096, // control
    2048, // expedited
    1500, // assured
    1024, // best effort
    512,
];

const MAX_DEFICIT: i64 = 16384;

/// A Deficit Round Robin (DRR) selector over the flows of one peer.
#[derive(Debug, Clone)]
pub struct DeficitRoundRobin {
    quanta: Vec<i64>,
    deficits: Vec<i64>,
    needs_quantum: Vec<bool>,
    /// Flows with data, in service order.
    active: VecDeque<FlowId>,
}

impl Default for DeficitRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl DeficitRoundRobin {
    pub fn new() -> Self {
        Self::with_quanta(DEFAULT_QUANTA.to_vec())
    }

    pub fn with_quanta(quanta: Vec<i64>) -> Self {
        Self {
            quanta,
            deficits: Vec::new(),
            needs_quantum: Vec::new(),
            active: VecDeque::new(),
        }
    }

    fn quantum(&self, flow: FlowId) -> i64 {
        let idx = (flow.0 as usize).min(self.quanta.len().saturating_sub(1));
        self.quanta.get(idx).copied().unwrap_or(1500).max(1)
    }

    fn ensure(&mut self, flow: FlowId) {
        let len = flow.0 as usize + 1;
        if self.deficits.len() < len {
            self.deficits.resize(len, 0);
            self.needs_quantum.resize(len, true);
        }
    }

    pub fn deficit(&self, flow: FlowId) -> i64 {
        self.deficits.get(flow.0 as usize).copied().unwrap_or(0)
    }
}

impl FlowSelector for DeficitRoundRobin {
    fn next_flow(&mut self, candidates: &[SchedulingContext]) -> Option<FlowId> {
        // Idle flows leave the round and lose their deficit.
        let mut idle = Vec::new();
        self.active.retain(|f| {
            let keep = candidates.iter().any(|c| c.flow == *f);
            if !keep {
                idle.push(*f);
            }
            keep
        });
        for f in idle {
            self.deficits[f.0 as usize] = 0;
            self.needs_quantum[f.0 as usize] = true;
        }

        for c in candidates {
            if !self.active.contains(&c.flow) {
                self.ensure(c.flow);
                if c.flow.is_control() {
                    self.active.push_front(c.flow);
                } else {
                    self.active.push_back(c.flow);
                }
                self.needs_quantum[c.flow.0 as usize] = true;
            }
        }

        for _ in 0..=2 * self.active.len() {
            let flow = *self.active.front()?;
            let idx = flow.0 as usize;
            if self.needs_quantum[idx] {
                let quantum = self.quantum(flow);
                self.deficits[idx] = (self.deficits[idx] + quantum).min(MAX_DEFICIT);
                self.needs_quantum[idx] = false;
            }
            if self.deficits[idx] > 0 {
                return Some(flow);
            }
            self.active.rotate_left(1);
            self.needs_quantum[idx] = true;
        }
        None
    }

    fn on_served(&mut self, flow: FlowId, bytes: usize) {
        self.ensure(flow);
        let idx = flow.0 as usize;
        // Oversized frames are not carried over as debt.
        self.deficits[idx] = (self.deficits[idx] - bytes as i64).max(0);
        if self.deficits[idx] == 0 && self.active.front() == Some(&flow) {
            // Deficit exhausted. Next flow.
            self.active.rotate_left(1);
            self.needs_quantum[idx] = true;
        }
    }
}
