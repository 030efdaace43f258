use sat_llc::protocol::{ACK_MESSAGE_LEN, FlowId, FragmentKind, FrameType, SeqNo};
use sat_llc::{ControlMessage, Frame, LlcError, SelectiveAck};

fn is_malformed(result: Result<Frame, LlcError>) -> bool {
    matches!(result, Err(LlcError::MalformedFrame(_)))
}

#[test]
fn test_decode_plain_data_frame() {
    let frame = Frame::decode(&[0xc0, 3, 0, 2, 0xaa, 0xbb]).unwrap();
    assert_eq!(frame.header.kind, FragmentKind::Full);
    assert_eq!(frame.header.frame_type, FrameType::Data);
    assert_eq!(frame.header.flow_id, FlowId(3));
    assert_eq!(frame.header.seq, None);
    assert_eq!(frame.payload, vec![0xaa, 0xbb]);
}

#[test]
fn test_decode_rejects_truncated_header() {
    assert!(is_malformed(Frame::decode(&[])));
    assert!(is_malformed(Frame::decode(&[0xc0, 1, 0])));
    // Sequence bit set but no sequence byte.
    assert!(is_malformed(Frame::decode(&[0xc8, 1, 0, 0])));
}

#[test]
fn test_decode_rejects_length_mismatch() {
    assert!(is_malformed(Frame::decode(&[0xc0, 1, 0, 3, 1, 2])));
    assert!(is_malformed(Frame::decode(&[0xc0, 1, 0, 1, 1, 2])));
}

#[test]
fn test_decode_rejects_reserved_bits_and_unknown_type() {
    assert!(is_malformed(Frame::decode(&[0xc1, 1, 0, 0])));
    assert!(is_malformed(Frame::decode(&[0xe0, 1, 0, 0])));
}

#[test]
fn test_control_frames_must_be_full_on_flow_zero() {
    let ack = ControlMessage::Ack(SelectiveAck {
        flow_id: FlowId(1),
        base: SeqNo(9),
        bitmask: 0,
    });
    let bytes = Frame::control(&ack).encode();
    assert_eq!(bytes[0], 0xd0);
    assert!(Frame::decode(&bytes).is_ok());

    let mut on_data_flow = bytes.clone();
    on_data_flow[1] = 2;
    assert!(is_malformed(Frame::decode(&on_data_flow)));

    let mut fragmented = bytes;
    fragmented[0] = 0x90;
    assert!(is_malformed(Frame::decode(&fragmented)));
}

#[test]
fn test_ack_message_layout() {
    let message = ControlMessage::Ack(SelectiveAck {
        flow_id: FlowId(2),
        base: SeqNo(250),
        bitmask: 0x8000_0000_0000_0001,
    });
    let bytes = message.encode();
    assert_eq!(bytes.len(), ACK_MESSAGE_LEN);
    assert_eq!(&bytes[..3], &[0x01, 2, 250]);
    assert_eq!(&bytes[3..], &[0x80, 0, 0, 0, 0, 0, 0, 0x01]);
    assert_eq!(ControlMessage::decode(&bytes), Ok(message));
}

#[test]
fn test_control_message_errors() {
    assert!(matches!(
        ControlMessage::decode(&[]),
        Err(LlcError::MalformedFrame(_))
    ));
    assert!(matches!(
        ControlMessage::decode(&[0x7f, 1]),
        Err(LlcError::MalformedFrame(_))
    ));
    assert!(matches!(
        ControlMessage::decode(&[0x01, 1, 2]),
        Err(LlcError::MalformedFrame(_))
    ));
    assert_eq!(
        ControlMessage::decode(&[0x02, b'h', b'i']),
        Ok(ControlMessage::Signalling(b"hi".to_vec()))
    );
}

#[test]
fn test_ack_across_wraparound() {
    let ack = SelectiveAck {
        flow_id: FlowId(1),
        base: SeqNo(2),
        bitmask: 0b10,
    };
    assert!(ack.acknowledges(SeqNo(255)));
    assert!(ack.acknowledges(SeqNo(0)));
    assert!(ack.acknowledges(SeqNo(1)));
    assert!(!ack.acknowledges(SeqNo(3)));
    assert!(ack.acknowledges(SeqNo(4)));
    assert!(!ack.acknowledges(SeqNo(100)));
}
