//! End-to-end bridge scenarios: two bridges joined by in-memory byte
//! pipes, each with a local connection standing in for its router.

use std::{
    collections::VecDeque,
    io::{ErrorKind, Read, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use weft_bridge::Bridge;
use weft_core::{
    config::BridgeConfig,
    connection::Connection,
    direct::DirectConnection,
    identifier::Identifier,
    message::{Message, MessageId},
};
use weft_protocol::special;

/// In-memory byte pipe; reads report WouldBlock while empty.
#[derive(Clone, Default)]
struct TestPipe(Arc<Mutex<VecDeque<u8>>>);

impl Read for TestPipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut queue = self.0.lock().expect("pipe lock");
        if queue.is_empty() {
            return Err(std::io::Error::from(ErrorKind::WouldBlock));
        }
        let n = buf.len().min(queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().expect("non-empty");
        }
        Ok(n)
    }
}

impl Write for TestPipe {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("pipe lock").extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn user_msg(method: &str) -> MessageId {
    MessageId::new(Identifier::new("eagiTest"), Identifier::new(method))
}

/// Builds a bridge with an assigned id and a connection whose other half
/// plays the local router.
fn bridge_with_id(id: u64) -> (Bridge, DirectConnection) {
    let (server, mut router_side) = DirectConnection::pair();
    let mut bridge = Bridge::new(BridgeConfig::default());
    bridge.add_connection(Box::new(server));
    bridge.update();
    // Drain the id request and assign the id
    router_side.fetch_messages(&mut |_, _, _| true);
    let mut assignment = Message::new();
    assignment.set_target_id(id);
    assert!(router_side.send(special::ASSIGN_ID, &assignment));
    bridge.update();
    // Drain the id announcement
    router_side.fetch_messages(&mut |_, _, _| true);
    (bridge, router_side)
}

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
    for _ in 0..1000 {
        if let Some(value) = poll() {
            return value;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached in time");
}

#[test]
fn test_two_bridges_relay_user_messages() {
    let left_to_right = TestPipe::default();
    let right_to_left = TestPipe::default();

    let (mut left, mut left_router) = bridge_with_id(5001);
    left.add_streams(Box::new(right_to_left.clone()), Box::new(left_to_right.clone()));

    let (mut right, mut right_router) = bridge_with_id(6001);
    right.add_streams(Box::new(left_to_right), Box::new(right_to_left));

    // A user message enters through the left router connection
    let mut message = Message::with_payload(vec![0xca, 0xfe, 0xba, 0xbe]);
    message.set_source_id(100).set_target_id(200).set_sequence_no(31);
    assert!(left_router.send(user_msg("relay"), &message));

    let relayed = wait_for(|| {
        left.update();
        right.update();
        let mut found = None;
        right_router.fetch_messages(&mut |msg_id, _, received| {
            if msg_id == user_msg("relay") {
                found = Some(received.clone());
            }
            true
        });
        found
    });

    assert_eq!(relayed.source_id, 100);
    assert_eq!(relayed.target_id, 200);
    assert_eq!(relayed.sequence_no, 31);
    assert_eq!(relayed.content(), &[0xca, 0xfe, 0xba, 0xbe]);
    // One hop onto the stream, one hop off it
    assert_eq!(relayed.hop_count, 2);

    assert_eq!(left.forwarded_to_output(), 1);
    assert!(right.forwarded_to_connection() >= 1);
    assert_eq!(left.decode_errors(), 0);
    assert_eq!(right.decode_errors(), 0);
}

#[test]
fn test_bridge_framing_produces_clean_lines() {
    let wire = TestPipe::default();
    let (mut bridge, mut router_side) = bridge_with_id(5001);
    bridge.add_streams(Box::new(TestPipe::default()), Box::new(wire.clone()));

    let mut message = Message::with_payload(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    message.set_source_id(100).set_target_id(200);
    assert!(router_side.send(user_msg("framed"), &message));

    let line = wait_for(|| {
        bridge.update();
        let queue = wire.0.lock().expect("pipe lock");
        if queue.iter().any(|&b| b == b'\n') {
            Some(queue.iter().copied().collect::<Vec<u8>>())
        } else {
            None
        }
    });

    // The record is base64 alphabet only, newline terminated
    assert_eq!(*line.last().unwrap(), b'\n');
    for &b in &line[..line.len() - 1] {
        assert!(
            b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=',
            "unexpected byte {b:#x} in framed record",
        );
    }

    // Decoding the line recovers the envelope and payload
    let (msg_id, decoded) = weft_protocol::framing::decode_record(&line).unwrap();
    assert_eq!(msg_id, user_msg("framed"));
    assert_eq!(decoded.source_id, 100);
    assert_eq!(decoded.target_id, 200);
    assert_eq!(decoded.content(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_ping_through_the_stream_is_answered() {
    let left_to_right = TestPipe::default();
    let right_to_left = TestPipe::default();

    let (mut left, mut left_router) = bridge_with_id(5001);
    left.add_streams(Box::new(right_to_left.clone()), Box::new(left_to_right.clone()));

    let (mut right, _right_router) = bridge_with_id(6001);
    right.add_streams(Box::new(left_to_right), Box::new(right_to_left));

    // Ping the remote bridge across the stream
    let mut ping = Message::new();
    ping.set_source_id(100).set_target_id(6001).set_sequence_no(5);
    assert!(left_router.send(special::PING, &ping));

    let pong = wait_for(|| {
        left.update();
        right.update();
        let mut found = None;
        left_router.fetch_messages(&mut |msg_id, _, message| {
            if msg_id == special::PONG {
                found = Some(message.clone());
            }
            true
        });
        found
    });

    assert_eq!(pong.source_id, 6001);
    assert_eq!(pong.target_id, 100);
    assert_eq!(pong.sequence_no, 5);
}

#[test]
fn test_corrupt_line_is_skipped_and_counted() {
    let wire = TestPipe::default();

    let (mut bridge, mut router_side) = bridge_with_id(5001);
    bridge.add_streams(Box::new(wire.clone()), Box::new(TestPipe::default()));
    bridge.update();

    wire.clone().write_all(b"%%% not a record %%%\n").unwrap();

    // A valid record after the corrupt one still gets through
    let mut record = Vec::new();
    let mut message = Message::with_payload(vec![42]);
    message.set_source_id(7).set_target_id(8);
    weft_protocol::framing::encode_record(user_msg("ok"), &message, &mut record).unwrap();
    wire.clone().write_all(&record).unwrap();

    let delivered = wait_for(|| {
        bridge.update();
        let mut found = None;
        router_side.fetch_messages(&mut |msg_id, _, received| {
            if msg_id == user_msg("ok") {
                found = Some(received.clone());
            }
            true
        });
        found
    });
    assert_eq!(delivered.content(), &[42]);
    assert_eq!(bridge.decode_errors(), 1);
}
