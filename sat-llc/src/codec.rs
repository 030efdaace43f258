//! Fragmentation of queued payload units into opportunity-sized fragments and
//! reassembly of fragments back into units.

use crate::error::LlcError;
use crate::protocol::{FragmentKind, MAX_FRAME_PAYLOAD};
use crate::queue::LlcQueue;
use tracing::trace;

/// A fragment pulled from a queue, ready to be wrapped into a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub payload: Vec<u8>,
}

/// Smallest opportunity that can carry one payload byte behind `header_len`.
pub fn min_tx_opportunity(header_len: usize) -> usize {
    header_len + 1
}

/// Pulls the next fragment out of `queue` for an opportunity of `opportunity_bytes`.
///
/// The fragment kind follows from the head unit: an untouched unit that fits is sent
/// FULL, otherwise its maximal prefix is sent as START and the residual stays at the
/// head of the queue. A residual head continues with CONTINUATION fragments until the
/// fragment that drains it, which is sent as END.
///
/// Returns `None` if the queue is empty or the opportunity cannot carry a header plus
/// one payload byte. With `fragmentation` disabled a unit is only sent whole.
pub fn encode(
    queue: &mut LlcQueue,
    opportunity_bytes: usize,
    header_len: usize,
    fragmentation: bool,
) -> Option<Fragment> {
    let remaining = queue.peek()?.len();
    let budget = opportunity_bytes
        .checked_sub(header_len)?
        .min(MAX_FRAME_PAYLOAD);

    if remaining == 0 {
        // Empty unit: a bare header is enough.
        let partial = queue.front_is_partial();
        let payload = queue.dequeue()?;
        let kind = if partial {
            FragmentKind::End
        } else {
            FragmentKind::Full
        };
        return Some(Fragment { kind, payload });
    }

    if budget == 0 {
        return None;
    }

    let partial = queue.front_is_partial();
    if remaining > budget && !fragmentation {
        trace!(
            flow = %queue.flow_id(),
            remaining,
            budget,
            "unit does not fit and fragmentation is disabled"
        );
        return None;
    }

    let take = remaining.min(budget);
    let drains = take == remaining;
    let kind = match (partial, drains) {
        (false, true) => FragmentKind::Full,
        (false, false) => FragmentKind::Start,
        (true, false) => FragmentKind::Continuation,
        (true, true) => FragmentKind::End,
    };
    let payload = queue.dequeue_prefix(take)?;
    Some(Fragment { kind, payload })
}

/// Per-flow receive-side reassembly context.
///
/// Holds at most one partially received unit. Fragments are appended in arrival
/// order; any reordering has to happen before fragments reach this layer.
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    in_progress: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment, returning the unit it completes, if any.
    ///
    /// A START or FULL arriving while another unit is in progress discards the stale
    /// partial. CONTINUATION and END without a preceding START are rejected.
    pub fn reassemble(
        &mut self,
        kind: FragmentKind,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, LlcError> {
        match kind {
            FragmentKind::Full => {
                self.discard_stale();
                Ok(Some(payload))
            }
            FragmentKind::Start => {
                self.discard_stale();
                self.buffer = payload;
                self.in_progress = true;
                Ok(None)
            }
            FragmentKind::Continuation => {
                if !self.in_progress {
                    return Err(LlcError::UnexpectedFragment);
                }
                self.buffer.extend_from_slice(&payload);
                Ok(None)
            }
            FragmentKind::End => {
                if !self.in_progress {
                    return Err(LlcError::UnexpectedFragment);
                }
                self.buffer.extend_from_slice(&payload);
                self.in_progress = false;
                Ok(Some(std::mem::take(&mut self.buffer)))
            }
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Bytes of the partially received unit.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drops a partially received unit without delivering it.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }

    fn discard_stale(&mut self) {
        if self.in_progress {
            trace!(
                bytes = self.buffer.len(),
                "discarding stale partial unit"
            );
            self.discard();
        }
    }
}
