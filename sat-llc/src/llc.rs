//! The flow dispatcher: owns every flow of every peer and routes upper-layer
//! packets, transmission opportunities, received frames and timer ticks to them.

use crate::classifier;
use crate::config::LlcConfig;
use crate::encap::{
    BaseDecapsulator, BaseEncapsulator, Decapsulator, Encapsulator, FlowDecapsulator,
    FlowEncapsulator, FlowEvent, ReliableDecapsulator, ReliableEncapsulator,
};
use crate::error::LlcError;
use crate::frame::{ControlMessage, Frame};
use crate::protocol::{FlowId, FrameType, PeerAddress, PeerId};
use crate::queue::{LlcQueue, QueueObserver};
use crate::registry::PeerRegistry;
use crate::scheduler::{FlowSelector, SchedulingContext, StrictPriority};
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Receiver of everything the link layer hands upwards.
pub trait UpperLayer {
    /// A reassembled unit, in delivery order. Signalling messages arrive on
    /// [`FlowId::CONTROL`].
    fn receive(&mut self, peer: PeerAddress, flow: FlowId, unit: Vec<u8>);

    /// A frame was given up on, either by the sender after its last
    /// retransmission or by the receiver after the receive waiting time.
    fn on_loss(&mut self, _peer: PeerAddress, _flow: FlowId, _error: LlcError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlcEvent {
    Delivered {
        peer: PeerAddress,
        flow: FlowId,
        unit: Vec<u8>,
    },
    Lost {
        peer: PeerAddress,
        flow: FlowId,
        error: LlcError,
    },
}

/// An [`UpperLayer`] that records everything for later polling.
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<LlcEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_event(&mut self) -> Option<LlcEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl UpperLayer for EventLog {
    fn receive(&mut self, peer: PeerAddress, flow: FlowId, unit: Vec<u8>) {
        self.events.push_back(LlcEvent::Delivered { peer, flow, unit });
    }

    fn on_loss(&mut self, peer: PeerAddress, flow: FlowId, error: LlcError) {
        self.events.push_back(LlcEvent::Lost { peer, flow, error });
    }
}

#[derive(Debug)]
struct Flow {
    encap: FlowEncapsulator,
    decap: FlowDecapsulator,
}

#[derive(Debug)]
struct PeerState<S> {
    id: PeerId,
    /// Indexed by flow id.
    flows: Vec<Flow>,
    selector: S,
}

impl<S> PeerState<S> {
    fn flow_mut(&mut self, flow: FlowId) -> Result<&mut Flow, LlcError> {
        self.flows
            .get_mut(flow.0 as usize)
            .ok_or(LlcError::UnknownFlow(flow))
    }

    fn flow(&self, flow: FlowId) -> Result<&Flow, LlcError> {
        self.flows
            .get(flow.0 as usize)
            .ok_or(LlcError::UnknownFlow(flow))
    }
}

type Candidates = SmallVec<[SchedulingContext; 8]>;

/// Link-layer dispatcher for all peers of one node.
///
/// Each peer is scheduled by its own copy of the selector.
pub struct Llc<U: UpperLayer, S: FlowSelector + Clone = StrictPriority> {
    config: LlcConfig,
    registry: PeerRegistry,
    peers: HashMap<PeerAddress, PeerState<S>>,
    /// Cloned into each new peer.
    selector: S,
    upper: U,
    observers: Vec<Arc<dyn QueueObserver>>,
}

impl<U: UpperLayer> Llc<U, StrictPriority> {
    pub fn new(config: LlcConfig, registry: PeerRegistry, upper: U) -> Result<Self, LlcError> {
        Self::with_selector(config, registry, upper, StrictPriority)
    }
}

impl<U: UpperLayer, S: FlowSelector + Clone> Llc<U, S> {
    pub fn with_selector(
        config: LlcConfig,
        registry: PeerRegistry,
        upper: U,
        selector: S,
    ) -> Result<Self, LlcError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            peers: HashMap::new(),
            selector,
            upper,
            observers: Vec::new(),
        })
    }

    pub fn config(&self) -> &LlcConfig {
        &self.config
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn upper_layer(&self) -> &U {
        &self.upper
    }

    pub fn upper_layer_mut(&mut self) -> &mut U {
        &mut self.upper
    }

    /// Scheduling state towards `peer`.
    pub fn selector(&self, peer: &PeerAddress) -> Option<&S> {
        self.peers.get(peer).map(|state| &state.selector)
    }

    /// Subscribes `observer` to every queue, present and future.
    pub fn add_queue_observer(&mut self, observer: Arc<dyn QueueObserver>) {
        for state in self.peers.values_mut() {
            for flow in &mut state.flows {
                flow.encap.add_observer(observer.clone());
            }
        }
        self.observers.push(observer);
    }

    /// Creates the control flow and all data flows towards `address`.
    ///
    /// Adding a known peer returns its id and leaves its flows untouched.
    pub fn add_peer(&mut self, address: PeerAddress) -> PeerId {
        if let Some(state) = self.peers.get(&address) {
            return state.id;
        }

        let id = self.registry.register(address);
        let flows = (0..self.config.num_flows)
            .map(|f| self.create_flow(FlowId(f)))
            .collect();
        self.peers.insert(
            address,
            PeerState {
                id,
                flows,
                selector: self.selector.clone(),
            },
        );
        debug!(
            peer = %address,
            peer_id = %id,
            flows = self.config.num_flows,
            tx_arq = self.config.tx_arq_enabled,
            rx_arq = self.config.rx_arq_enabled,
            "peer added"
        );
        id
    }

    fn create_flow(&self, flow_id: FlowId) -> Flow {
        let mut queue = LlcQueue::with_limits(
            flow_id,
            self.config.queue_max_bytes,
            self.config.queue_max_packets,
        );
        for observer in &self.observers {
            queue.add_observer(observer.clone());
        }

        if flow_id.is_control() {
            return Flow {
                encap: FlowEncapsulator::Base(BaseEncapsulator::control(queue)),
                decap: FlowDecapsulator::Base(BaseDecapsulator::new()),
            };
        }

        let encap = if self.config.tx_arq_enabled {
            FlowEncapsulator::Reliable(ReliableEncapsulator::new(queue, self.config.arq.clone()))
        } else {
            FlowEncapsulator::Base(BaseEncapsulator::new(queue))
        };
        let decap = if self.config.rx_arq_enabled {
            FlowDecapsulator::Reliable(ReliableDecapsulator::new(flow_id, self.config.arq.clone()))
        } else {
            FlowDecapsulator::Base(BaseDecapsulator::new())
        };
        Flow { encap, decap }
    }

    /// Tears down every flow of `address`, discarding queued data, timers and
    /// partial reassemblies. Returns whether the peer was known.
    pub fn remove_peer(&mut self, address: &PeerAddress) -> bool {
        let Some(mut state) = self.peers.remove(address) else {
            return false;
        };
        for flow in &mut state.flows {
            flow.encap.clear();
            flow.decap.clear();
        }
        self.registry.unregister(address);
        debug!(peer = %address, peer_id = %state.id, "peer removed");
        true
    }

    pub fn has_peer(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerAddress> {
        self.peers.keys()
    }

    /// Queues an upper-layer packet on the data flow its ToS byte maps to.
    pub fn enqueue(&mut self, payload: Vec<u8>, dest: PeerAddress, tos: u8) -> Result<(), LlcError> {
        let flow = classifier::classify(tos, self.config.num_flows);
        self.enqueue_on_flow(payload, dest, flow)
    }

    /// Queues an upper-layer packet on an explicit data flow.
    pub fn enqueue_on_flow(
        &mut self,
        payload: Vec<u8>,
        dest: PeerAddress,
        flow: FlowId,
    ) -> Result<(), LlcError> {
        if flow.is_control() {
            return Err(LlcError::UnknownFlow(flow));
        }
        let state = self
            .peers
            .get_mut(&dest)
            .ok_or(LlcError::UnknownPeer(dest))?;
        let len = payload.len();
        state.flow_mut(flow)?.encap.enqueue(payload)?;
        trace!(peer = %dest, flow = %flow, bytes = len, "unit queued");
        Ok(())
    }

    /// Queues an opaque signalling message on the control flow of `dest`.
    pub fn send_control(&mut self, payload: Vec<u8>, dest: PeerAddress) -> Result<(), LlcError> {
        let message = ControlMessage::Signalling(payload).encode();
        let state = self
            .peers
            .get_mut(&dest)
            .ok_or(LlcError::UnknownPeer(dest))?;
        state.flow_mut(FlowId::CONTROL)?.encap.enqueue(message)
    }

    /// Fills one transmission opportunity towards `peer`.
    ///
    /// The selector picks among the flows that have something to send and can use an
    /// opportunity of this size. A selected flow that produces no frame (window full,
    /// control message too large) is dropped from the candidates and the selector is
    /// asked again.
    pub fn notify_tx_opportunity(
        &mut self,
        peer: PeerAddress,
        opportunity_bytes: usize,
        now: Instant,
    ) -> Option<Frame> {
        let mut candidates: Candidates = self
            .peer_contexts(&peer, now)
            .into_iter()
            .filter(|c| c.min_tx_opportunity <= opportunity_bytes)
            .collect();

        while !candidates.is_empty() {
            let flow = self.peers.get_mut(&peer)?.selector.next_flow(&candidates)?;
            if !candidates.iter().any(|c| c.flow == flow) {
                warn!(peer = %peer, flow = %flow, "selector picked a flow that is not a candidate");
                return None;
            }
            if let Some(frame) = self.notify_tx_opportunity_for_flow(peer, flow, opportunity_bytes, now) {
                if let Some(state) = self.peers.get_mut(&peer) {
                    state.selector.on_served(flow, frame.len());
                }
                return Some(frame);
            }
            candidates.retain(|c| c.flow != flow);
        }
        None
    }

    /// Fills one transmission opportunity from a specific flow.
    pub fn notify_tx_opportunity_for_flow(
        &mut self,
        peer: PeerAddress,
        flow: FlowId,
        opportunity_bytes: usize,
        now: Instant,
    ) -> Option<Frame> {
        let Some(state) = self.peers.get_mut(&peer) else {
            warn!(peer = %peer, "transmission opportunity for unknown peer");
            return None;
        };
        let peer_id = state.id;
        let Ok(f) = state.flow_mut(flow) else {
            warn!(peer = %peer, flow = %flow, "transmission opportunity for unknown flow");
            return None;
        };

        let mut events = Vec::new();
        let frame = f.encap.notify_tx_opportunity(opportunity_bytes, now, &mut events);
        self.handle_events(peer, flow, events);

        if let Some(frame) = &frame {
            trace!(
                peer_id = %peer_id,
                flow = %flow,
                kind = ?frame.header.kind,
                seq = ?frame.header.seq,
                bytes = frame.len(),
                opportunity_bytes,
                "frame produced"
            );
        }
        frame
    }

    /// Processes one frame received from `peer`.
    ///
    /// Failures are never fatal: the frame is discarded and the flow keeps its state.
    pub fn receive_frame(&mut self, peer: PeerAddress, bytes: &[u8], now: Instant) -> Result<(), LlcError> {
        let result = self.process_frame(peer, bytes, now);
        if let Err(e) = &result {
            debug!(peer = %peer, bytes = bytes.len(), "discarding received frame: {e}");
        }
        result
    }

    fn process_frame(&mut self, peer: PeerAddress, bytes: &[u8], now: Instant) -> Result<(), LlcError> {
        let frame = Frame::decode(bytes)?;
        let state = self
            .peers
            .get_mut(&peer)
            .ok_or(LlcError::UnknownPeer(peer))?;

        match frame.header.frame_type {
            FrameType::Control => {
                match ControlMessage::decode(&frame.payload)? {
                    ControlMessage::Ack(ack) => {
                        if ack.flow_id.is_control() {
                            return Err(LlcError::UnknownFlow(ack.flow_id));
                        }
                        state.flow_mut(ack.flow_id)?.encap.on_ack(&ack);
                    }
                    ControlMessage::Signalling(body) => {
                        self.upper.receive(peer, FlowId::CONTROL, body);
                    }
                }
                Ok(())
            }
            FrameType::Data => {
                let flow = frame.header.flow_id;
                if flow.is_control() {
                    return Err(LlcError::MalformedFrame(
                        "data frame on the control flow".to_string(),
                    ));
                }
                let mut events = Vec::new();
                let result = state
                    .flow_mut(flow)?
                    .decap
                    .receive_frame(frame, now, &mut events);
                self.handle_events(peer, flow, events);
                result
            }
        }
    }

    /// Runs the transmit and receive timers of every flow.
    pub fn tick(&mut self, now: Instant) {
        let mut pending: Vec<(PeerAddress, FlowId, Vec<FlowEvent>)> = Vec::new();
        for (address, state) in &mut self.peers {
            for (idx, flow) in state.flows.iter_mut().enumerate() {
                let mut events = Vec::new();
                flow.encap.tick(now, &mut events);
                flow.decap.tick(now, &mut events);
                if !events.is_empty() {
                    pending.push((*address, FlowId(idx as u8), events));
                }
            }
        }
        for (peer, flow, events) in pending {
            self.handle_events(peer, flow, events);
        }
    }

    fn handle_events(&mut self, peer: PeerAddress, flow: FlowId, events: Vec<FlowEvent>) {
        for event in events {
            match event {
                FlowEvent::Delivered(unit) => self.upper.receive(peer, flow, unit),
                FlowEvent::Lost(seq) => {
                    self.report_loss(peer, flow, LlcError::RetransmissionLimitExceeded { seq })
                }
                FlowEvent::Skipped(seq) => {
                    self.report_loss(peer, flow, LlcError::FrameSkipped { seq })
                }
                FlowEvent::SendAck(ack) => {
                    let message = ControlMessage::Ack(ack).encode();
                    let queued = self
                        .peers
                        .get_mut(&peer)
                        .ok_or(LlcError::UnknownPeer(peer))
                        .and_then(|state| state.flow_mut(FlowId::CONTROL))
                        .and_then(|control| {
                            // A newer acknowledgement covers everything an older one for the same flow did.
                            let superseded = control.encap.queue_mut().retain(|unit| {
                                !matches!(
                                    ControlMessage::decode(unit),
                                    Ok(ControlMessage::Ack(old)) if old.flow_id == ack.flow_id
                                )
                            });
                            if superseded > 0 {
                                trace!(peer = %peer, flow = %flow, superseded, "replacing queued acknowledgement");
                            }
                            control.encap.enqueue(message)
                        });
                    if let Err(e) = queued {
                        warn!(peer = %peer, flow = %flow, base = %ack.base, "dropping acknowledgement: {e}");
                    }
                }
            }
        }
    }

    fn report_loss(&mut self, peer: PeerAddress, flow: FlowId, error: LlcError) {
        if self.config.arq.report_losses {
            self.upper.on_loss(peer, flow, error);
        } else {
            debug!(peer = %peer, flow = %flow, "{error}");
        }
    }

    fn peer_contexts(&self, peer: &PeerAddress, now: Instant) -> Vec<SchedulingContext> {
        let Some(state) = self.peers.get(peer) else {
            return Vec::new();
        };
        state
            .flows
            .iter()
            .filter_map(|f| {
                let buffered_bytes = f.encap.buffered_bytes(now);
                let has_retransmission = f.encap.has_pending_retransmission(now);
                (f.encap.buffered_packets() > 0 || has_retransmission).then(|| SchedulingContext {
                    peer: *peer,
                    flow: f.encap.flow_id(),
                    buffered_bytes,
                    min_tx_opportunity: f.encap.min_tx_opportunity(),
                    has_retransmission,
                })
            })
            .collect()
    }

    /// Every flow, of every peer, that has something to send.
    pub fn scheduling_contexts(&self, now: Instant) -> Vec<SchedulingContext> {
        let mut contexts: Vec<SchedulingContext> = self
            .peers
            .keys()
            .flat_map(|peer| self.peer_contexts(peer, now))
            .collect();
        contexts.sort_by_key(|c| (c.peer, c.flow));
        contexts
    }

    /// Whether no flow of any peer has queued data.
    pub fn buffers_empty(&self) -> bool {
        self.peers
            .values()
            .flat_map(|s| s.flows.iter())
            .all(|f| f.encap.queue().is_empty())
    }

    pub fn bytes_queued(&self, peer: &PeerAddress, flow: FlowId) -> Result<usize, LlcError> {
        let state = self.peers.get(peer).ok_or(LlcError::UnknownPeer(*peer))?;
        Ok(state.flow(flow)?.encap.queue().bytes_queued())
    }

    pub fn packets_queued(&self, peer: &PeerAddress, flow: FlowId) -> Result<usize, LlcError> {
        let state = self.peers.get(peer).ok_or(LlcError::UnknownPeer(*peer))?;
        Ok(state.flow(flow)?.encap.queue().packets_queued())
    }

    /// Earliest instant at which [`Llc::tick`] or an opportunity has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.peers
            .values()
            .flat_map(|s| s.flows.iter())
            .flat_map(|f| [f.encap.next_deadline(), f.decap.next_deadline()])
            .flatten()
            .min()
    }
}
