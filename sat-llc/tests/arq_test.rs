use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use sat_llc::arq::{ArqReceiver, ArqSender, InOrderFragment};
use sat_llc::codec::Reassembler;
use sat_llc::protocol::{FlowId, FragmentKind, SeqNo};
use sat_llc::{ArqConfig, LlcError, LlcQueue, SelectiveAck};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(window_size: u8, max_retransmissions: u32) -> ArqConfig {
    ArqConfig {
        window_size,
        max_retransmissions,
        ..ArqConfig::default()
    }
}

fn queue_with(units: usize, len: usize) -> LlcQueue {
    let mut queue = LlcQueue::new(FlowId(1));
    for i in 0..units {
        queue.enqueue(vec![i as u8; len]).unwrap();
    }
    queue
}

fn reassemble(reassembler: &mut Reassembler, fragments: Vec<InOrderFragment>, out: &mut Vec<Vec<u8>>) {
    for (kind, payload) in fragments {
        if let Ok(Some(unit)) = reassembler.reassemble(kind, payload) {
            out.push(unit);
        }
    }
}

#[test]
fn test_window_limits_outstanding_frames() {
    let mut sender = ArqSender::new(FlowId(1), config(4, 2));
    let mut queue = queue_with(10, 10);
    let now = Instant::now();
    let mut lost = Vec::new();

    for i in 0..4 {
        let frame = sender
            .notify_tx_opportunity(&mut queue, 100, now, &mut lost)
            .unwrap();
        assert_eq!(frame.header.seq, Some(SeqNo(i)));
    }
    assert!(sender.notify_tx_opportunity(&mut queue, 100, now, &mut lost).is_none());
    assert_eq!(sender.outstanding(), 4);
    assert!(!sender.window_has_room());
    assert_eq!(queue.packets_queued(), 6);
    assert!(lost.is_empty());
}

#[test]
fn test_acknowledgement_is_idempotent() {
    let mut sender = ArqSender::new(FlowId(1), config(8, 2));
    let mut queue = queue_with(3, 10);
    let now = Instant::now();
    let mut lost = Vec::new();
    for _ in 0..3 {
        sender.notify_tx_opportunity(&mut queue, 100, now, &mut lost);
    }

    let ack = SelectiveAck {
        flow_id: FlowId(1),
        base: SeqNo(2),
        bitmask: 0,
    };
    assert_eq!(sender.on_ack(&ack), 2);
    assert_eq!(sender.on_ack(&ack), 0);
    assert_eq!(sender.outstanding(), 1);
    assert_eq!(sender.low_water_mark(), SeqNo(2));
    assert_eq!(sender.in_flight_seqs(), vec![SeqNo(2)]);
}

#[test]
fn test_selective_ack_holds_window_at_oldest_gap() {
    let mut sender = ArqSender::new(FlowId(1), config(4, 2));
    let mut queue = queue_with(5, 10);
    let now = Instant::now();
    let mut lost = Vec::new();
    for _ in 0..4 {
        sender.notify_tx_opportunity(&mut queue, 100, now, &mut lost);
    }

    sender.on_ack(&SelectiveAck {
        flow_id: FlowId(1),
        base: SeqNo(0),
        bitmask: 0b111,
    });
    assert_eq!(sender.outstanding(), 1);
    assert_eq!(sender.low_water_mark(), SeqNo(0));
    assert!(sender.notify_tx_opportunity(&mut queue, 100, now, &mut lost).is_none());
}

#[test]
fn test_unacknowledged_frame_lost_after_retransmissions() {
    init_tracing();
    let mut sender = ArqSender::new(FlowId(1), config(4, 2));
    let mut queue = queue_with(8, 10);
    let t0 = Instant::now();
    let timer = Duration::from_millis(600);
    let mut lost = Vec::new();

    for _ in 0..4 {
        sender.notify_tx_opportunity(&mut queue, 100, t0, &mut lost);
    }
    // Everything but sequence 0 gets through.
    sender.on_ack(&SelectiveAck {
        flow_id: FlowId(1),
        base: SeqNo(0),
        bitmask: 0b111,
    });

    assert!(!sender.has_pending_retransmission(t0 + timer / 2));
    for attempt in 1..=2u32 {
        let now = t0 + timer * attempt;
        assert!(sender.has_pending_retransmission(now));
        let frame = sender
            .notify_tx_opportunity(&mut queue, 100, now, &mut lost)
            .unwrap();
        assert_eq!(frame.header.seq, Some(SeqNo(0)));
        assert_eq!(sender.retransmission_count(), attempt as u64);
    }
    assert!(lost.is_empty());

    sender.tick(t0 + timer * 3, &mut lost);
    assert_eq!(lost, vec![SeqNo(0)]);
    assert_eq!(sender.outstanding(), 0);
    assert_eq!(sender.low_water_mark(), SeqNo(4));
    assert!(sender.window_has_room());

    let frame = sender
        .notify_tx_opportunity(&mut queue, 100, t0 + timer * 3, &mut lost)
        .unwrap();
    assert_eq!(frame.header.seq, Some(SeqNo(4)));
}

#[test]
fn test_retransmission_waits_for_large_enough_opportunity() {
    let mut sender = ArqSender::new(FlowId(1), config(4, 2));
    let mut queue = queue_with(2, 50);
    let t0 = Instant::now();
    let mut lost = Vec::new();
    let first = sender
        .notify_tx_opportunity(&mut queue, 100, t0, &mut lost)
        .unwrap();
    assert_eq!(first.len(), 55);

    // Too small for the stored frame: new data is cut to size instead.
    let later = t0 + Duration::from_millis(600);
    let frame = sender
        .notify_tx_opportunity(&mut queue, 20, later, &mut lost)
        .unwrap();
    assert_eq!(frame.header.seq, Some(SeqNo(1)));
    assert_eq!(frame.header.kind, FragmentKind::Start);

    let frame = sender
        .notify_tx_opportunity(&mut queue, 100, later, &mut lost)
        .unwrap();
    assert_eq!(frame, first);
}

#[test]
fn test_receiver_suppresses_duplicates() {
    let mut receiver = ArqReceiver::new(FlowId(1), ArqConfig::default());
    let now = Instant::now();
    let mut out = Vec::new();

    let ack = receiver
        .on_data(SeqNo(0), FragmentKind::Full, vec![1], now, &mut out)
        .unwrap()
        .unwrap();
    assert_eq!(ack.base, SeqNo(1));
    assert_eq!(out.len(), 1);

    let ack = receiver
        .on_data(SeqNo(0), FragmentKind::Full, vec![1], now, &mut out)
        .unwrap()
        .unwrap();
    assert_eq!(ack.base, SeqNo(1));
    assert_eq!(out.len(), 1);

    // Far behind the window is still a duplicate.
    assert!(
        receiver
            .on_data(SeqNo(200), FragmentKind::Full, vec![1], now, &mut out)
            .unwrap()
            .is_some()
    );
    assert_eq!(out.len(), 1);
}

#[test]
fn test_receiver_reorders_within_window() {
    let mut receiver = ArqReceiver::new(FlowId(1), ArqConfig::default());
    let now = Instant::now();
    let mut out = Vec::new();

    let ack = receiver
        .on_data(SeqNo(2), FragmentKind::Full, vec![2], now, &mut out)
        .unwrap()
        .unwrap();
    assert_eq!((ack.base, ack.bitmask), (SeqNo(0), 0b10));
    let ack = receiver
        .on_data(SeqNo(1), FragmentKind::Full, vec![1], now, &mut out)
        .unwrap()
        .unwrap();
    assert_eq!((ack.base, ack.bitmask), (SeqNo(0), 0b11));
    assert!(out.is_empty());
    assert_eq!(receiver.buffered(), 2);

    let ack = receiver
        .on_data(SeqNo(0), FragmentKind::Full, vec![0], now, &mut out)
        .unwrap()
        .unwrap();
    assert_eq!((ack.base, ack.bitmask), (SeqNo(3), 0));
    let payloads: Vec<Vec<u8>> = out.into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![vec![0], vec![1], vec![2]]);
    assert_eq!(receiver.buffered(), 0);
}

#[test]
fn test_receiver_rejects_sequence_beyond_horizon() {
    let mut receiver = ArqReceiver::new(FlowId(1), config(4, 2));
    let now = Instant::now();
    let mut out = Vec::new();

    assert_eq!(
        receiver.on_data(SeqNo(4), FragmentKind::Full, vec![], now, &mut out),
        Err(LlcError::SequenceOutOfBounds {
            seq: SeqNo(4),
            expected: SeqNo(0),
        })
    );
    assert!(
        receiver
            .on_data(SeqNo(3), FragmentKind::Full, vec![], now, &mut out)
            .is_ok()
    );
    assert_eq!(receiver.expected(), SeqNo(0));
}

#[test]
fn test_receiver_skips_hole_after_waiting_time() {
    init_tracing();
    let mut receiver = ArqReceiver::new(FlowId(1), ArqConfig::default());
    let t0 = Instant::now();
    let mut out = Vec::new();

    receiver
        .on_data(SeqNo(1), FragmentKind::Full, vec![1], t0, &mut out)
        .unwrap();
    assert_eq!(receiver.next_deadline(), Some(t0 + Duration::from_millis(1800)));

    let outcome = receiver.tick(t0 + Duration::from_millis(1799), &mut out);
    assert!(outcome.skipped.is_empty());
    assert!(outcome.ack.is_none());
    assert!(out.is_empty());

    let outcome = receiver.tick(t0 + Duration::from_millis(1800), &mut out);
    assert_eq!(outcome.skipped, vec![SeqNo(0)]);
    assert_eq!(outcome.ack.map(|a| a.base), Some(SeqNo(2)));
    assert_eq!(out, vec![(FragmentKind::Full, vec![1])]);
    assert_eq!(receiver.expected(), SeqNo(2));
    assert_eq!(receiver.next_deadline(), None);
}

#[test]
fn test_receiver_delays_in_order_acknowledgements() {
    let cfg = ArqConfig {
        ack_every: 3,
        max_ack_delay_ms: 100,
        ..ArqConfig::default()
    };
    let mut receiver = ArqReceiver::new(FlowId(1), cfg);
    let t0 = Instant::now();
    let mut out = Vec::new();

    for seq in 0..2 {
        assert_eq!(
            receiver.on_data(SeqNo(seq), FragmentKind::Full, vec![], t0, &mut out),
            Ok(None)
        );
    }
    assert_eq!(receiver.next_deadline(), Some(t0 + Duration::from_millis(100)));
    assert!(receiver.tick(t0 + Duration::from_millis(50), &mut out).ack.is_none());
    let ack = receiver
        .tick(t0 + Duration::from_millis(100), &mut out)
        .ack
        .unwrap();
    assert_eq!(ack.base, SeqNo(2));

    let mut acks = Vec::new();
    for seq in 2..5 {
        acks.push(
            receiver
                .on_data(SeqNo(seq), FragmentKind::Full, vec![], t0, &mut out)
                .unwrap(),
        );
    }
    assert_eq!(acks[0], None);
    assert_eq!(acks[1], None);
    assert_eq!(acks[2].map(|a| a.base), Some(SeqNo(5)));
}

#[test]
fn test_sequence_numbers_wrap() {
    let mut sender = ArqSender::new(FlowId(1), config(10, 2));
    let mut receiver = ArqReceiver::new(FlowId(1), config(10, 2));
    let mut reassembler = Reassembler::new();
    let mut queue = LlcQueue::new(FlowId(1));
    let units: Vec<Vec<u8>> = (0..600u32).map(|i| i.to_be_bytes().to_vec()).collect();
    for unit in &units {
        queue.enqueue(unit.clone()).unwrap();
    }

    let now = Instant::now();
    let mut lost = Vec::new();
    let mut delivered = Vec::new();
    while let Some(frame) = sender.notify_tx_opportunity(&mut queue, 7, now, &mut lost) {
        let seq = frame.header.seq.unwrap();
        let mut fragments = Vec::new();
        let ack = receiver
            .on_data(seq, frame.header.kind, frame.payload, now, &mut fragments)
            .unwrap();
        reassemble(&mut reassembler, fragments, &mut delivered);
        if let Some(ack) = ack {
            sender.on_ack(&ack);
        }
    }

    assert_eq!(delivered, units);
    assert!(lost.is_empty());
    assert_eq!(sender.outstanding(), 0);
}

proptest! {
    #[test]
    fn test_lossless_delivery_exactly_once(
        window in 1u8..=64,
        opportunity in 6usize..400,
        units in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..500), 1..40),
    ) {
        let cfg = config(window, 2);
        let mut sender = ArqSender::new(FlowId(1), cfg.clone());
        let mut receiver = ArqReceiver::new(FlowId(1), cfg);
        let mut reassembler = Reassembler::new();
        let mut queue = LlcQueue::new(FlowId(1));
        for unit in &units {
            queue.enqueue(unit.clone()).unwrap();
        }

        let now = Instant::now();
        let mut lost = Vec::new();
        let mut pending_acks = VecDeque::new();
        let mut delivered = Vec::new();
        loop {
            match sender.notify_tx_opportunity(&mut queue, opportunity, now, &mut lost) {
                Some(frame) => {
                    prop_assert!(frame.len() <= opportunity);
                    let mut fragments = Vec::new();
                    let ack = receiver
                        .on_data(frame.header.seq.unwrap(), frame.header.kind, frame.payload, now, &mut fragments)
                        .unwrap();
                    reassemble(&mut reassembler, fragments, &mut delivered);
                    pending_acks.extend(ack);
                }
                None if pending_acks.is_empty() => break,
                // Acknowledgements only come back once the window stalls.
                None => {
                    for ack in pending_acks.drain(..) {
                        sender.on_ack(&ack);
                    }
                }
            }
            prop_assert!(sender.outstanding() <= window as usize);
        }

        prop_assert_eq!(delivered, units);
        prop_assert!(lost.is_empty());
        prop_assert_eq!(sender.outstanding(), 0);
    }

    #[test]
    fn test_lossy_delivery_is_ordered_without_duplicates(
        seed in any::<u64>(),
        loss in 0.0f64..0.4,
        count in 1usize..60,
    ) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let cfg = config(8, 2);
        let mut sender = ArqSender::new(FlowId(1), cfg.clone());
        let mut receiver = ArqReceiver::new(FlowId(1), cfg);
        let mut reassembler = Reassembler::new();
        let mut queue = LlcQueue::new(FlowId(1));
        let units: Vec<Vec<u8>> = (0..count)
            .map(|i| {
                let mut unit = (i as u16).to_be_bytes().to_vec();
                unit.resize(2 + rng.gen_range(0..300), i as u8);
                unit
            })
            .collect();
        for unit in &units {
            queue.enqueue(unit.clone()).unwrap();
        }

        let mut now = Instant::now();
        let mut lost = Vec::new();
        let mut delivered = Vec::new();
        for _ in 0..5_000 {
            let mut acks = Vec::new();
            if let Some(frame) = sender.notify_tx_opportunity(&mut queue, 120, now, &mut lost)
                && !rng.gen_bool(loss)
            {
                let mut fragments = Vec::new();
                if let Ok(ack) = receiver.on_data(
                    frame.header.seq.unwrap(),
                    frame.header.kind,
                    frame.payload,
                    now,
                    &mut fragments,
                ) {
                    acks.extend(ack);
                }
                reassemble(&mut reassembler, fragments, &mut delivered);
            }

            sender.tick(now, &mut lost);
            let mut fragments = Vec::new();
            let outcome = receiver.tick(now, &mut fragments);
            if !outcome.skipped.is_empty() {
                reassembler.discard();
            }
            reassemble(&mut reassembler, fragments, &mut delivered);
            acks.extend(outcome.ack);

            for ack in acks {
                if !rng.gen_bool(loss) {
                    sender.on_ack(&ack);
                }
            }
            prop_assert!(sender.outstanding() <= 8);

            if queue.is_empty() && sender.outstanding() == 0 && receiver.buffered() == 0 {
                break;
            }
            now += Duration::from_millis(100);
        }

        let mut last = None;
        for unit in &delivered {
            let idx = u16::from_be_bytes([unit[0], unit[1]]) as usize;
            prop_assert!(last.is_none_or(|l| idx > l));
            prop_assert_eq!(unit, &units[idx]);
            last = Some(idx);
        }
        if loss == 0.0 {
            prop_assert_eq!(delivered.len(), count);
        }
    }
}
