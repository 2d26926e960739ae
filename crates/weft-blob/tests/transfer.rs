//! Blob transfer scenarios: large zero streams with small fragments and
//! a bounded per-tick message budget.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use weft_blob::{BlobEngine, BlobInfo, ConstantSource, SequenceSource, TargetBlobIo};

use weft_core::{
    config::BlobConfig,
    identifier::Identifier,
    message::{Message, MessageId, Priority},
};

/// Target that checks every stored byte and counts completions.
struct ZeroesTarget {
    expected_size: u64,
    stored_bytes: Arc<AtomicU64>,
    finishes: Arc<AtomicUsize>,
    cancellations: Arc<AtomicUsize>,
}

impl TargetBlobIo for ZeroesTarget {
    fn store_fragment(&mut self, offset: u64, data: &[u8], _info: &BlobInfo) -> bool {
        assert!(offset < self.expected_size || data.is_empty());
        assert!(offset + data.len() as u64 <= self.expected_size);
        assert!(data.iter().all(|&b| b == 0), "every stored byte is zero");
        self.stored_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
        true
    }

    fn check_stored(&mut self, offset: u64, data: &[u8]) -> bool {
        assert!(offset < self.expected_size);
        data.iter().all(|&b| b == 0)
    }

    fn handle_finished(&mut self, msg_id: MessageId, info: &BlobInfo) {
        assert_eq!(msg_id.class, Identifier::new("test"));
        assert_eq!(info.total_size, self.expected_size);
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_cancelled(&mut self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_engine() -> BlobEngine {
    BlobEngine::new(
        MessageId::new(Identifier::new("test"), Identifier::new("send")),
        MessageId::new(Identifier::new("test"), Identifier::new("resend")),
        MessageId::new(Identifier::new("test"), Identifier::new("prepare")),
        BlobConfig::default(),
    )
}

fn zeroes_round_trip(size: u64, fragment_size: usize, budget: usize) {
    let content_id = MessageId::new(Identifier::new("test"), Identifier::new("zeroes"));
    let mut sender = test_engine();
    let mut receiver = test_engine();

    sender.push_outgoing(
        content_id,
        1,
        2,
        42,
        Box::new(ConstantSource::zeroes(size)),
        Duration::from_secs(3600),
        Priority::Normal,
    );

    let stored_bytes = Arc::new(AtomicU64::new(0));
    let finishes = Arc::new(AtomicUsize::new(0));
    let cancellations = Arc::new(AtomicUsize::new(0));
    receiver.expect_incoming(
        content_id,
        1,
        42,
        Box::new(ZeroesTarget {
            expected_size: size,
            stored_bytes: stored_bytes.clone(),
            finishes: finishes.clone(),
            cancellations: cancellations.clone(),
        }),
        Duration::from_secs(3600),
    );

    let mut guard = 0u64;
    while receiver.has_incoming() {
        let mut in_flight: Vec<(MessageId, Message)> = Vec::new();
        sender.process_outgoing(
            &mut |msg_id, message| {
                in_flight.push((msg_id, message.clone()));
                true
            },
            fragment_size,
            budget,
        );
        for (msg_id, message) in &in_flight {
            assert!(receiver.process_incoming(&mut |_, _| None, *msg_id, message));
        }
        receiver.handle_complete();
        guard += 1;
        assert!(guard < 1_000_000, "transfer did not converge");
    }

    assert_eq!(stored_bytes.load(Ordering::SeqCst), size);
    assert_eq!(finishes.load(Ordering::SeqCst), 1);
    assert_eq!(cancellations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_zeroes_round_trip_4mib_with_small_fragments() {
    zeroes_round_trip(4 * 1024 * 1024, 2048, 2);
}

#[test]
fn test_zeroes_round_trip_boundary_sizes() {
    zeroes_round_trip(0, 2048, 2);
    zeroes_round_trip(1, 2048, 2);
    zeroes_round_trip(4 * 1024, 2048, 2);
}

#[test]
fn test_sequence_stream_survives_fragment_loss() {
    let content_id = MessageId::new(Identifier::new("test"), Identifier::new("sequence"));
    let size: u64 = 16 * 1024;
    let mut sender = test_engine();
    let mut receiver = BlobEngine::new(
        MessageId::new(Identifier::new("test"), Identifier::new("send")),
        MessageId::new(Identifier::new("test"), Identifier::new("resend")),
        MessageId::new(Identifier::new("test"), Identifier::new("prepare")),
        BlobConfig { resend_delay: Duration::ZERO, ..Default::default() },
    );

    sender.push_outgoing(
        content_id,
        1,
        2,
        7,
        Box::new(SequenceSource::new(size)),
        Duration::from_secs(3600),
        Priority::Normal,
    );

    struct SequenceTarget {
        finished: Arc<AtomicUsize>,
    }
    impl TargetBlobIo for SequenceTarget {
        fn store_fragment(&mut self, offset: u64, data: &[u8], _info: &BlobInfo) -> bool {
            for (i, &b) in data.iter().enumerate() {
                assert_eq!(b, SequenceSource::byte_at(offset + i as u64));
            }
            true
        }

        fn handle_finished(&mut self, _msg_id: MessageId, _info: &BlobInfo) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    let finished = Arc::new(AtomicUsize::new(0));
    receiver.expect_incoming(
        content_id,
        1,
        7,
        Box::new(SequenceTarget { finished: finished.clone() }),
        Duration::from_secs(3600),
    );

    // Lose every third message on the way over
    let mut sent_count = 0usize;
    let mut guard = 0;
    while receiver.has_incoming() {
        let mut in_flight: Vec<(MessageId, Message)> = Vec::new();
        sender.process_outgoing(
            &mut |msg_id, message| {
                sent_count += 1;
                if sent_count % 3 != 0 {
                    in_flight.push((msg_id, message.clone()));
                }
                true
            },
            1024,
            4,
        );
        for (msg_id, message) in &in_flight {
            receiver.process_incoming(&mut |_, _| None, *msg_id, message);
        }

        // The receiver notices gaps and asks the sender to resend
        let mut resend_requests: Vec<(MessageId, Message)> = Vec::new();
        receiver.update(&mut |msg_id, message| {
            resend_requests.push((msg_id, message.clone()));
            true
        });
        for (_, request) in &resend_requests {
            let mut request = request.clone();
            request.set_source_id(2);
            sender.process_resend(&request);
        }

        receiver.handle_complete();
        guard += 1;
        assert!(guard < 100_000, "transfer did not converge");
    }
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}
