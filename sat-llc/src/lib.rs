//! # sat-llc
//!
//! Link-layer framing and reliability for a satellite hop.
//!
//! Upper-layer packets are queued per (peer, flow), cut into frames that fit the
//! transmission opportunities granted by a scheduler, and reassembled on the far side.
//! Data flows can optionally run a selective-repeat ARQ.
//!
//! ## Architecture
//!
//! - **Queue**: per-flow FIFO with byte/packet accounting and observers.
//! - **Codec**: FULL / START / CONTINUATION / END fragmentation and reassembly.
//! - **ARQ**: 8-bit sequence numbers, sliding window, bitmap acknowledgements,
//!   retransmission timers.
//! - **Dispatcher**: [`Llc`] routes enqueues, opportunities, received frames and timer
//!   ticks to the right flow, and acknowledgements over the control flow.
//!
//! All time is passed in explicitly as [`std::time::Instant`]; nothing here blocks or
//! spawns.

pub mod arq;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod encap;
pub mod error;
pub mod frame;
pub mod llc;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use config::{ArqConfig, LlcConfig};
pub use encap::{Decapsulator, Encapsulator, FlowDecapsulator, FlowEncapsulator, FlowEvent};
pub use error::{ConfigError, LlcError};
pub use frame::{ControlMessage, Frame, FrameHeader, SelectiveAck};
pub use llc::{EventLog, Llc, LlcEvent, UpperLayer};
pub use protocol::{FlowId, FragmentKind, FrameType, PeerAddress, PeerId, SeqNo};
pub use queue::{LlcQueue, QueueEvent, QueueObserver};
pub use registry::PeerRegistry;
pub use scheduler::{DeficitRoundRobin, FlowSelector, SchedulingContext, StrictPriority};
