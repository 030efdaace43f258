//! Wire format of link-layer frames and control messages.
//!
//! ```text
//!  byte 0   S E T T Q 0 0 0   S = start, E = end, TT = frame type, Q = sequence present
//!  byte 1   flow id
//!  byte 2-3 payload length (big endian)
//!  byte 4   sequence number (only when Q is set)
//! ```

use crate::error::LlcError;
use crate::protocol::{
    ACK_MESSAGE_LEN, BASE_HEADER_LEN, ControlMessageType, FlowId, FragmentKind, FrameType,
    MAX_FRAME_PAYLOAD, SEQUENCED_HEADER_LEN, SEQUENCE_SPACE, SeqNo,
};

const START_BIT: u8 = 0x80;
const END_BIT: u8 = 0x40;
const TYPE_SHIFT: u8 = 4;
const TYPE_MASK: u8 = 0x30;
const SEQ_BIT: u8 = 0x08;
const RESERVED_MASK: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FragmentKind,
    pub frame_type: FrameType,
    pub flow_id: FlowId,
    /// Present on frames of ARQ flows only.
    pub seq: Option<SeqNo>,
}

impl FrameHeader {
    pub fn encoded_len(&self) -> usize {
        if self.seq.is_some() {
            SEQUENCED_HEADER_LEN
        } else {
            BASE_HEADER_LEN
        }
    }
}

/// A header-tagged wire unit produced for one transmission opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(flow_id: FlowId, kind: FragmentKind, seq: Option<SeqNo>, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader {
                kind,
                frame_type: FrameType::Data,
                flow_id,
                seq,
            },
            payload,
        }
    }

    pub fn control(message: &ControlMessage) -> Self {
        Self {
            header: FrameHeader {
                kind: FragmentKind::Full,
                frame_type: FrameType::Control,
                flow_id: FlowId::CONTROL,
                seq: None,
            },
            payload: message.encode(),
        }
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn len(&self) -> usize {
        self.header.encoded_len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_FRAME_PAYLOAD);
        let h = &self.header;
        let mut flags = (h.frame_type as u8) << TYPE_SHIFT;
        if h.kind.start_indicator() {
            flags |= START_BIT;
        }
        if h.kind.end_indicator() {
            flags |= END_BIT;
        }
        if h.seq.is_some() {
            flags |= SEQ_BIT;
        }

        let mut out = Vec::with_capacity(self.len());
        out.push(flags);
        out.push(h.flow_id.0);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        if let Some(seq) = h.seq {
            out.push(seq.0);
        }
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LlcError> {
        if bytes.len() < BASE_HEADER_LEN {
            return Err(LlcError::MalformedFrame(format!(
                "truncated header ({} bytes)",
                bytes.len()
            )));
        }

        let flags = bytes[0];
        if flags & RESERVED_MASK != 0 {
            return Err(LlcError::MalformedFrame(format!(
                "reserved bits set ({flags:#04x})"
            )));
        }
        let frame_type = FrameType::try_from((flags & TYPE_MASK) >> TYPE_SHIFT)
            .map_err(|t| LlcError::MalformedFrame(format!("unknown frame type {t}")))?;
        let kind = FragmentKind::from_indicators(flags & START_BIT != 0, flags & END_BIT != 0);
        let flow_id = FlowId(bytes[1]);
        let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        let (seq, header_len) = if flags & SEQ_BIT != 0 {
            if bytes.len() < SEQUENCED_HEADER_LEN {
                return Err(LlcError::MalformedFrame(
                    "truncated sequence number".to_string(),
                ));
            }
            (Some(SeqNo(bytes[4])), SEQUENCED_HEADER_LEN)
        } else {
            (None, BASE_HEADER_LEN)
        };

        let actual = bytes.len() - header_len;
        if declared != actual {
            return Err(LlcError::MalformedFrame(format!(
                "declared {declared} payload bytes, got {actual}"
            )));
        }

        if frame_type == FrameType::Control
            && (!flow_id.is_control() || kind != FragmentKind::Full || seq.is_some())
        {
            return Err(LlcError::MalformedFrame(
                "control frame must be an unsequenced FULL frame on flow 0".to_string(),
            ));
        }

        Ok(Self {
            header: FrameHeader {
                kind,
                frame_type,
                flow_id,
                seq,
            },
            payload: bytes[header_len..].to_vec(),
        })
    }
}

/// A selective acknowledgement for one ARQ flow.
///
/// Every sequence number before `base` has been received (or skipped) by the peer;
/// bit `i` of `bitmask` acknowledges `base + 1 + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectiveAck {
    pub flow_id: FlowId,
    pub base: SeqNo,
    pub bitmask: u64,
}

impl SelectiveAck {
    /// Whether `seq` is covered by this acknowledgement.
    pub fn acknowledges(&self, seq: SeqNo) -> bool {
        let behind = self.base.wrapping_sub(seq) as usize;
        if behind > 0 && behind <= SEQUENCE_SPACE / 2 {
            return true;
        }
        let ahead = seq.wrapping_sub(self.base) as usize;
        (1..=64).contains(&ahead) && self.bitmask & (1u64 << (ahead - 1)) != 0
    }
}

/// Payload of a CONTROL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ack(SelectiveAck),
    Signalling(Vec<u8>),
}

impl ControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlMessage::Ack(ack) => {
                let mut out = Vec::with_capacity(ACK_MESSAGE_LEN);
                out.push(ControlMessageType::Ack as u8);
                out.push(ack.flow_id.0);
                out.push(ack.base.0);
                out.extend_from_slice(&ack.bitmask.to_be_bytes());
                out
            }
            ControlMessage::Signalling(data) => {
                let mut out = Vec::with_capacity(data.len() + 1);
                out.push(ControlMessageType::Signalling as u8);
                out.extend_from_slice(data);
                out
            }
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LlcError> {
        let (&tag, body) = payload
            .split_first()
            .ok_or_else(|| LlcError::MalformedFrame("empty control message".to_string()))?;
        let msg_type = ControlMessageType::try_from(tag)
            .map_err(|t| LlcError::MalformedFrame(format!("unknown control message {t:#04x}")))?;

        match msg_type {
            ControlMessageType::Ack => {
                if payload.len() != ACK_MESSAGE_LEN {
                    return Err(LlcError::MalformedFrame(format!(
                        "acknowledgement of {} bytes",
                        payload.len()
                    )));
                }
                let mut mask = [0u8; 8];
                mask.copy_from_slice(&body[2..10]);
                Ok(ControlMessage::Ack(SelectiveAck {
                    flow_id: FlowId(body[0]),
                    base: SeqNo(body[1]),
                    bitmask: u64::from_be_bytes(mask),
                }))
            }
            ControlMessageType::Signalling => Ok(ControlMessage::Signalling(body.to_vec())),
        }
    }
}
