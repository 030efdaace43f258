use std::fmt;

macro_rules! protocol_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

protocol_newtype!(
    FlowId,
    u8,
    "Identifier of a logical flow towards one peer. Flow 0 carries control traffic."
);

impl FlowId {
    /// The reserved flow for control messages and acknowledgements.
    pub const CONTROL: FlowId = FlowId(0);

    pub fn is_control(self) -> bool {
        self == Self::CONTROL
    }
}

protocol_newtype!(
    SeqNo,
    u8,
    "ARQ sequence number, drawn from a modulo-256 space."
);

impl SeqNo {
    pub fn wrapping_add(self, val: u8) -> Self {
        SeqNo(self.0.wrapping_add(val))
    }

    /// Distance from `other` forward to `self` in the modulo space.
    pub fn wrapping_sub(self, other: SeqNo) -> u8 {
        self.0.wrapping_sub(other.0)
    }
}

protocol_newtype!(
    PeerId,
    u32,
    "Numeric peer identifier handed out by the peer registry."
);

/// Link-layer address of a peer (a UT or a GW).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    /// Builds a locally administered address from a numeric index.
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        PeerAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(val: [u8; 6]) -> Self {
        PeerAddress(val)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

/// Position of a frame's payload within its payload unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// The whole unit.
    Full,
    /// First fragment of a unit that continues in later frames.
    Start,
    Continuation,
    /// Last fragment; completes the unit.
    End,
}

impl FragmentKind {
    pub fn from_indicators(start: bool, end: bool) -> Self {
        match (start, end) {
            (true, true) => FragmentKind::Full,
            (true, false) => FragmentKind::Start,
            (false, false) => FragmentKind::Continuation,
            (false, true) => FragmentKind::End,
        }
    }

    pub fn start_indicator(self) -> bool {
        matches!(self, FragmentKind::Full | FragmentKind::Start)
    }

    pub fn end_indicator(self) -> bool {
        matches!(self, FragmentKind::Full | FragmentKind::End)
    }
}

/// The frame-type tag carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x00,
    Control = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::Control),
            other => Err(other),
        }
    }
}

/// First byte of every CONTROL frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessageType {
    /// Selective acknowledgement for one ARQ flow.
    Ack = 0x01,
    /// Opaque control message for the upper layer.
    Signalling = 0x02,
}

impl TryFrom<u8> for ControlMessageType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0x01 => Ok(ControlMessageType::Ack),
            0x02 => Ok(ControlMessageType::Signalling),
            other => Err(other),
        }
    }
}

/// Header length of a frame without a sequence number.
pub const BASE_HEADER_LEN: usize = 4;
/// Header length of an ARQ frame (base header plus one sequence byte).
pub const SEQUENCED_HEADER_LEN: usize = BASE_HEADER_LEN + 1;
/// The length field is 16 bits wide.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Number of distinct sequence numbers.
pub const SEQUENCE_SPACE: usize = 256;
/// Largest window the 64-bit selective acknowledgement bitmap can describe.
pub const MAX_WINDOW_SIZE: u8 = 64;

/// Control tag + acked flow + base sequence number + bitmap.
pub const ACK_MESSAGE_LEN: usize = 1 + 1 + 1 + 8;

/// Control flow plus three data flows (EF, AF, BE).
pub const DEFAULT_NUM_FLOWS: u8 = 4;
