// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Tests for hdds-xrce-reliable.
//
// Session-level scenarios over the loopback transport: wire layout of flushed
// slots, ACKNACK and HEARTBEAT handling against a hand-driven peer, ordered
// delivery and fragment reassembly between two sessions, lossy links, and the
// scheduler feeding a session from several producers.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::error::XrceError;
use crate::scheduler::{FcfsScheduler, Scheduler};
use crate::seq_num::SeqNum;
use crate::session::ClientSession;
use crate::transport::{LoopbackTransport, XrceTransport};
use crate::wire::*;

type Session = ClientSession<LoopbackTransport>;

fn config(mtu: usize, history: u16) -> SessionConfig {
    SessionConfig {
        mtu,
        history,
        ..SessionConfig::default()
    }
}

fn drain(transport: &mut LoopbackTransport) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; transport.mtu()];
    while let Some(n) = transport.recv(&mut buf, 0).unwrap() {
        out.push(buf[..n].to_vec());
    }
    out
}

/// Message on stream 0 for session 0x81 carrying one control submessage.
fn control_message(write: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut msg = Vec::new();
    MessageHeader {
        session_id: 0x81,
        stream_id: STREAM_ID_NONE,
        sequence_nr: SeqNum(0),
        client_key: None,
    }
    .write_to(&mut msg);
    write(&mut msg);
    msg
}

fn reliable_message(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::new();
    MessageHeader {
        session_id: 0x81,
        stream_id: STREAM_ID_RELIABLE_FIRST,
        sequence_nr: SeqNum(seq),
        client_key: None,
    }
    .write_to(&mut msg);
    write_submessage(&mut msg, SUBMSG_WRITE_DATA, 0, payload).unwrap();
    msg
}

/// Drive both sessions in lockstep until `done` holds or ten seconds pass.
fn pump<F>(a: &mut Session, b: &mut Session, mut done: F) -> bool
where
    F: FnMut(&mut Session, &mut Session) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        a.run_session_time(1).unwrap();
        b.run_session_time(1).unwrap();
        if done(a, b) {
            return true;
        }
    }
    false
}

// -----------------------------------------------------------------------
// 1. Flush: small submessages share one datagram, header stamped in place
// -----------------------------------------------------------------------
#[test]
fn test_flush_stamps_header_and_packs_submessages() {
    let (ta, mut peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    for i in 0..3u8 {
        a.write_submessage(SUBMSG_WRITE_DATA, 0, &[i; 10]).unwrap();
    }
    assert_eq!(a.flush().unwrap(), 1);
    assert_eq!(a.flush().unwrap(), 0);

    let sent = drain(&mut peer);
    assert_eq!(sent.len(), 1);
    let msg = &sent[0];
    assert_eq!(msg.len(), 4 + 3 * 16);
    assert_eq!(&msg[..4], &[0x81, 0x80, 0, 0]);
    assert_eq!(&msg[4..8], &[SUBMSG_WRITE_DATA, FLAG_LITTLE_ENDIAN, 10, 0]);
    assert_eq!(&msg[8..18], &[0; 10]);
    assert_eq!(&msg[18..20], &[0, 0]); // alignment padding
    assert_eq!(msg[20], SUBMSG_WRITE_DATA);
    assert!(!a.is_confirmed());

    let ack = control_message(|m| {
        AcknackPayload {
            first_unacked_seq: SeqNum(1),
            nack_bitmap: 0,
            stream_id: 0x80,
        }
        .write_submessage(m)
    });
    a.handle_message(&ack).unwrap();
    assert!(a.is_confirmed());
    assert_eq!(a.output().last_acknowledged(), SeqNum(0));
}

// -----------------------------------------------------------------------
// 2. ACKNACK with gaps: every unacknowledged slot is replayed
// -----------------------------------------------------------------------
#[test]
fn test_acknack_replays_lost_slots() {
    let (ta, mut peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    for i in 0..3u8 {
        // 4 + 56 fills a 64-byte slot after the 4-byte header.
        a.write_submessage(SUBMSG_WRITE_DATA, 0, &[i; 56]).unwrap();
    }
    assert_eq!(a.flush().unwrap(), 3);
    assert_eq!(drain(&mut peer).len(), 3);

    let nack = control_message(|m| {
        AcknackPayload {
            first_unacked_seq: SeqNum(0),
            nack_bitmap: 0b010,
            stream_id: 0x80,
        }
        .write_submessage(m)
    });
    a.handle_message(&nack).unwrap();

    let replayed = drain(&mut peer);
    let seqs: Vec<u16> = replayed
        .iter()
        .map(|m| MessageHeader::parse(m).unwrap().0.sequence_nr.get())
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(replayed[1][8], 1);
    assert_eq!(a.stats().messages_resent, 3);
    assert!(!a.output().send_lost());
}

// -----------------------------------------------------------------------
// 3. HEARTBEAT from the peer is answered with an ACKNACK
// -----------------------------------------------------------------------
#[test]
fn test_heartbeat_answered_with_acknack() {
    let (ta, mut peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    let hb = control_message(|m| {
        HeartbeatPayload {
            first_unacked_seq: SeqNum(0),
            last_unacked_seq: SeqNum(2),
            stream_id: 0x80,
        }
        .write_submessage(m)
    });
    a.handle_message(&hb).unwrap();

    let replies = drain(&mut peer);
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0],
        vec![0x81, 0x00, 0, 0, SUBMSG_ACKNACK, FLAG_LITTLE_ENDIAN, 5, 0, 0, 0, 0x00, 0x07, 0x80]
    );

    // After 0 and 2 arrive only 1 is reported missing.
    a.handle_message(&reliable_message(0, b"zero")).unwrap();
    a.handle_message(&reliable_message(2, b"two")).unwrap();
    a.handle_message(&hb).unwrap();
    let reply = drain(&mut peer).pop().unwrap();
    let ack = AcknackPayload::parse(&reply[8..]).unwrap();
    assert_eq!(ack.first_unacked_seq, SeqNum(1));
    assert_eq!(ack.nack_bitmap, 0b01);
}

// -----------------------------------------------------------------------
// 4. Inbound reliable data is delivered in order
// -----------------------------------------------------------------------
#[test]
fn test_out_of_order_messages_delivered_in_order() {
    let (ta, _peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    a.handle_message(&reliable_message(0, b"a")).unwrap();
    a.handle_message(&reliable_message(2, b"c")).unwrap();
    a.handle_message(&reliable_message(3, b"d")).unwrap();
    let got: Vec<_> = a.take_received().into_iter().map(|s| s.payload).collect();
    assert_eq!(got, vec![b"a".to_vec()]);

    a.handle_message(&reliable_message(1, b"b")).unwrap();
    a.handle_message(&reliable_message(1, b"b")).unwrap();
    let got: Vec<_> = a.take_received().into_iter().map(|s| s.payload).collect();
    assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    assert!(a.input().is_up_to_date());
}

// -----------------------------------------------------------------------
// 5. Foreign sessions are ignored, foreign reliable streams rejected
// -----------------------------------------------------------------------
#[test]
fn test_foreign_traffic() {
    let (ta, _peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();

    let mut other_session = reliable_message(0, b"x");
    other_session[0] = 0x90;
    a.handle_message(&other_session).unwrap();

    let mut other_stream = reliable_message(0, b"x");
    other_stream[1] = 0x85;
    assert_eq!(
        a.handle_message(&other_stream),
        Err(XrceError::UnknownStream(0x85))
    );
    assert_eq!(a.handle_message(&[0x81]), Err(XrceError::BufferTooShort));
    assert!(a.take_received().is_empty());
}

// -----------------------------------------------------------------------
// 6. Window: writes stop after `history` slots until acknowledged
// -----------------------------------------------------------------------
#[test]
fn test_session_window_full_is_recoverable() {
    let (ta, tb) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 4), ta).unwrap();
    let mut b = ClientSession::new(config(64, 4), tb).unwrap();
    for i in 0..4u8 {
        a.write_submessage(SUBMSG_WRITE_DATA, 0, &[i; 56]).unwrap();
    }
    let err = a.write_submessage(SUBMSG_WRITE_DATA, 0, &[9; 56]).unwrap_err();
    assert_eq!(err, XrceError::WindowFull);
    assert!(err.is_recoverable());

    assert!(pump(&mut a, &mut b, |a, _| a.is_confirmed()));
    a.write_submessage(SUBMSG_WRITE_DATA, 0, &[9; 56]).unwrap();
    assert!(pump(&mut a, &mut b, |a, _| a.is_confirmed()));
    let got = b.take_received();
    assert_eq!(got.len(), 5);
    assert_eq!(got[4].payload, vec![9; 56]);
}

// -----------------------------------------------------------------------
// 7. Fragmentation: a submessage larger than the MTU is reassembled
// -----------------------------------------------------------------------
#[test]
fn test_large_submessage_fragmented_and_reassembled() {
    let (ta, tb) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    let mut b = ClientSession::new(config(64, 8), tb).unwrap();

    let big: Vec<u8> = (0..150u8).collect();
    a.write_submessage(SUBMSG_WRITE_DATA, 0, b"head").unwrap();
    a.write_submessage(SUBMSG_DATA, 0, &big).unwrap();
    a.write_submessage(SUBMSG_WRITE_DATA, 0, b"tail").unwrap();
    assert!(a.output().last_written().get() >= 2);

    let mut got = Vec::new();
    assert!(pump(&mut a, &mut b, |a, b| {
        got.extend(b.take_received());
        a.is_confirmed() && got.len() == 3
    }));
    assert_eq!(got[0].payload, b"head");
    assert_eq!(got[1].submessage_id, SUBMSG_DATA);
    assert_eq!(got[1].payload, big);
    assert_eq!(got[2].payload, b"tail");
}

// -----------------------------------------------------------------------
// 8. Lossy link: everything arrives exactly once, in order
// -----------------------------------------------------------------------
#[test]
fn test_lossy_link_delivers_everything_in_order() {
    let (ta, tb) = LoopbackTransport::pair(64);
    let mut rng_a = fastrand::Rng::with_seed(0x5EED);
    let mut rng_b = fastrand::Rng::with_seed(0x0B0B);
    let ta = ta.with_loss(move |_| rng_a.u8(..) < 64);
    let tb = tb.with_loss(move |_| rng_b.u8(..) < 64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    let mut b = ClientSession::new(config(64, 8), tb).unwrap();

    let payloads: Vec<Vec<u8>> = (0..40u8)
        .map(|i| vec![i; 1 + (usize::from(i) * 37) % 150])
        .collect();
    let mut received = Vec::new();
    let mut next = 0;
    let deadline = Instant::now() + Duration::from_secs(20);
    while received.len() < payloads.len() {
        assert!(Instant::now() < deadline, "stalled at {} of {}", received.len(), payloads.len());
        while next < payloads.len() {
            match a.write_submessage(SUBMSG_WRITE_DATA, 0, &payloads[next]) {
                Ok(()) => next += 1,
                Err(e) if e.is_recoverable() => break,
                Err(e) => panic!("write failed: {}", e),
            }
        }
        a.run_session_time(1).unwrap();
        b.run_session_time(1).unwrap();
        received.extend(b.take_received().into_iter().map(|s| s.payload));
    }
    assert_eq!(received, payloads);
    assert!(a.transport().dropped() > 0);
    assert!(a.stats().messages_resent > 0);
    assert!(pump(&mut a, &mut b, |a, _| a.is_confirmed()));
}

// -----------------------------------------------------------------------
// 9. Client key sessions use the 8-byte header end to end
// -----------------------------------------------------------------------
#[test]
fn test_client_key_session_roundtrip() {
    let cfg = SessionConfig {
        session_id: 0x01,
        client_key: [1, 2, 3, 4],
        ..config(64, 8)
    };
    let (ta, mut peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(cfg.clone(), ta).unwrap();
    assert_eq!(a.output().header_offset(), 8);
    a.write_submessage(SUBMSG_WRITE_DATA, 0, b"key").unwrap();
    a.flush().unwrap();
    let msg = drain(&mut peer).pop().unwrap();
    assert_eq!(&msg[..8], &[0x01, 0x80, 0, 0, 1, 2, 3, 4]);

    let (ta, tb) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(cfg.clone(), ta).unwrap();
    let mut b = ClientSession::new(cfg, tb).unwrap();
    a.write_submessage(SUBMSG_WRITE_DATA, 0, &[0xCC; 120]).unwrap();
    let mut got = Vec::new();
    assert!(pump(&mut a, &mut b, |a, b| {
        got.extend(b.take_received());
        a.is_confirmed() && !got.is_empty()
    }));
    assert_eq!(got[0].payload, vec![0xCC; 120]);
}

// -----------------------------------------------------------------------
// 10. Timeout: no peer, no confirmation
// -----------------------------------------------------------------------
#[test]
fn test_run_until_confirmed_times_out_without_peer() {
    let (ta, _peer) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    a.run_until_confirmed(10).unwrap();
    a.write_submessage(SUBMSG_WRITE_DATA, 0, b"ping").unwrap();
    assert_eq!(a.run_until_confirmed(30), Err(XrceError::Timeout));
    assert!(a.stats().heartbeats_sent > 0);
    assert!(!a.run_session_time(0).unwrap());
}

// -----------------------------------------------------------------------
// 11. Config: session MTU larger than the transport is rejected
// -----------------------------------------------------------------------
#[test]
fn test_session_rejects_oversized_mtu() {
    let (ta, _peer) = LoopbackTransport::pair(64);
    let err = ClientSession::new(config(128, 8), ta).unwrap_err();
    assert!(matches!(err, XrceError::ConfigError(_)));
}

// -----------------------------------------------------------------------
// 12. Scheduler feeding one session from several producers
// -----------------------------------------------------------------------
#[test]
fn test_scheduler_serializes_producers_into_session() {
    const PRODUCERS: u8 = 4;
    const PER_PRODUCER: u8 = 10;
    let total = usize::from(PRODUCERS) * usize::from(PER_PRODUCER);

    let (ta, tb) = LoopbackTransport::pair(64);
    let mut a = ClientSession::new(config(64, 8), ta).unwrap();
    let mut b = ClientSession::new(config(64, 8), tb).unwrap();
    let scheduler = Arc::new(FcfsScheduler::<Vec<u8>>::new(total));
    scheduler.init();

    let reader = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut got = Vec::new();
        while got.len() < total && Instant::now() < deadline {
            b.run_session_time(1).unwrap();
            got.extend(b.take_received().into_iter().map(|s| s.payload));
        }
        // Keep answering heartbeats while the writer confirms.
        let linger = Instant::now() + Duration::from_millis(500);
        while Instant::now() < linger {
            b.run_session_time(1).unwrap();
        }
        got
    });

    let writer = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            while let Some(payload) = scheduler.pop() {
                loop {
                    match a.write_submessage(SUBMSG_WRITE_DATA, 0, &payload) {
                        Ok(()) => break,
                        Err(e) if e.is_recoverable() => {
                            a.run_session_time(1).unwrap();
                        }
                        Err(e) => panic!("write failed: {}", e),
                    }
                }
                a.flush().unwrap();
            }
            a.run_until_confirmed(5_000)
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    scheduler.push(vec![p, i], 0);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    let start = Instant::now();
    while !scheduler.is_empty() && start.elapsed() < Duration::from_secs(10) {
        thread::sleep(Duration::from_millis(2));
    }
    scheduler.deinit();

    assert_eq!(writer.join().unwrap(), Ok(()));
    let got = reader.join().unwrap();
    assert_eq!(got.len(), total);
    // Per-producer order is preserved through the scheduler and the stream.
    for p in 0..PRODUCERS {
        let seq: Vec<u8> = got.iter().filter(|m| m[0] == p).map(|m| m[1]).collect();
        assert_eq!(seq, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}
