//! The shared bridge state.
//!
//! A [`BridgeState`] is shared between the bus thread and the two stream
//! worker threads. The workers hold only weak references, so dropping the
//! bridge ends both threads. The input double-buffer is guarded by one
//! mutex, the outgoing double-buffer by another paired with the
//! output-ready condition variable; the stream ends themselves are owned
//! exclusively by their worker threads.

use std::{
    io::{ErrorKind, Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use weft_core::message::{Message, MessageId};
use weft_protocol::framing::{decode_record, encode_record};

/// How long the output worker waits on the ready signal before rechecking
/// whether the state is still alive.
const OUTPUT_WAIT: Duration = Duration::from_millis(100);
/// How long the input worker sleeps when the stream has no complete line.
const INPUT_PAUSE: Duration = Duration::from_millis(5);

type QueuedMessage = (MessageId, Message, Instant);

/// State shared between the bridge and its two stream worker threads.
pub struct BridgeState {
    max_read: usize,
    incoming: Mutex<Vec<QueuedMessage>>,
    outgoing: Mutex<Vec<QueuedMessage>>,
    output_ready: Condvar,
    input_good: AtomicBool,
    output_good: AtomicBool,
    forwarded_messages: AtomicU64,
    dropped_messages: AtomicU64,
    decode_errors: AtomicU64,
}

struct InputWorker {
    stream: Box<dyn Read + Send>,
    scratch: Vec<u8>,
    discarding: bool,
}

struct OutputWorker {
    stream: Box<dyn Write + Send>,
    buffer: Vec<u8>,
}

impl BridgeState {
    /// Creates a bridge state accepting records up to `max_read` bytes.
    pub fn new(max_read: usize) -> Arc<Self> {
        Arc::new(Self {
            max_read,
            incoming: Mutex::new(Vec::new()),
            outgoing: Mutex::new(Vec::new()),
            output_ready: Condvar::new(),
            input_good: AtomicBool::new(true),
            output_good: AtomicBool::new(true),
            forwarded_messages: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        })
    }

    /// Spawns the input and output worker threads over the given streams.
    ///
    /// The threads run until this state is dropped or its streams become
    /// unrecoverable.
    pub fn start(
        self: &Arc<Self>,
        input: Box<dyn Read + Send>,
        output: Box<dyn Write + Send>,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut worker = InputWorker { stream: input, scratch: Vec::new(), discarding: false };
        std::thread::spawn({
            let weak = weak.clone();
            move || {
                while let Some(state) = weak.upgrade() {
                    if !state.recv_input(&mut worker) {
                        break;
                    }
                }
                debug!("bridge input thread finished");
            }
        });

        let mut worker = OutputWorker { stream: output, buffer: Vec::new() };
        std::thread::spawn(move || {
            while let Some(state) = weak.upgrade() {
                if !state.send_output(&mut worker) {
                    break;
                }
            }
            debug!("bridge output thread finished");
        });
    }

    /// True while the input stream is usable.
    pub fn input_usable(&self) -> bool {
        self.input_good.load(Ordering::Acquire)
    }

    /// True while the output stream is usable.
    pub fn output_usable(&self) -> bool {
        self.output_good.load(Ordering::Acquire)
    }

    /// True while both streams are usable.
    pub fn is_usable(&self) -> bool {
        self.input_usable() && self.output_usable()
    }

    /// Messages successfully written to the output stream.
    pub fn forwarded_messages(&self) -> u64 {
        self.forwarded_messages.load(Ordering::Relaxed)
    }

    /// Messages dropped before reaching the output stream.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Records that failed to decode from the input stream.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Enqueues a message for the output stream.
    pub fn push(&self, msg_id: MessageId, message: &Message) {
        self.outgoing.lock().push((msg_id, message.clone(), Instant::now()));
    }

    /// Wakes the output worker to drain the outgoing queue.
    pub fn notify_output_ready(&self) {
        self.output_ready.notify_one();
    }

    /// Drains messages decoded from the input stream through `handler`.
    /// The age passed to the handler is the queueing delay.
    pub fn fetch_messages(
        &self,
        handler: &mut dyn FnMut(MessageId, Duration, &Message) -> bool,
    ) -> bool {
        let batch = std::mem::take(&mut *self.incoming.lock());
        for (msg_id, message, queued_at) in &batch {
            handler(*msg_id, queued_at.elapsed(), message);
        }
        !batch.is_empty()
    }

    /// One iteration of the input worker: reads available bytes, frames
    /// newline-terminated records and queues decoded messages.
    ///
    /// Returns false once the input stream is unrecoverable.
    fn recv_input(&self, worker: &mut InputWorker) -> bool {
        let mut chunk = [0u8; 2048];
        match worker.stream.read(&mut chunk) {
            Ok(0) => {
                self.input_good.store(false, Ordering::Release);
                return false;
            }
            Ok(n) => worker.scratch.extend_from_slice(&chunk[..n]),
            Err(error)
                if error.kind() == ErrorKind::WouldBlock
                    || error.kind() == ErrorKind::Interrupted =>
            {
                std::thread::sleep(INPUT_PAUSE);
            }
            Err(error) => {
                warn!(%error, "bridge input stream failed");
                self.input_good.store(false, Ordering::Release);
                return false;
            }
        }

        while let Some(pos) = worker.scratch.iter().position(|&b| b == b'\n') {
            let record: Vec<u8> = worker.scratch.drain(..=pos).collect();
            if worker.discarding {
                // Tail of an over-long record; skip up to its newline
                worker.discarding = false;
                continue;
            }
            match decode_record(&record) {
                Ok((msg_id, message)) => {
                    self.incoming.lock().push((msg_id, message, Instant::now()));
                }
                Err(error) => {
                    debug!(%error, "discarding undecodable bridge record");
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // A line exceeding the read budget is dropped up to its newline
        if !worker.discarding && worker.scratch.len() > self.max_read {
            warn!(
                length = worker.scratch.len(),
                budget = self.max_read,
                "bridge input record exceeds read budget",
            );
            worker.scratch.clear();
            worker.discarding = true;
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// One iteration of the output worker: waits for the ready signal,
    /// swaps the outgoing queue and writes every queued record.
    ///
    /// Returns false once the output stream is unrecoverable.
    fn send_output(&self, worker: &mut OutputWorker) -> bool {
        let batch = {
            let mut outgoing = self.outgoing.lock();
            if outgoing.is_empty() {
                self.output_ready.wait_for(&mut outgoing, OUTPUT_WAIT);
            }
            std::mem::take(&mut *outgoing)
        };

        for (msg_id, mut message, queued_at) in batch {
            message.add_age(queued_at.elapsed());
            if message.too_old() {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            worker.buffer.clear();
            if encode_record(msg_id, &message, &mut worker.buffer).is_err() {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if worker.stream.write_all(&worker.buffer).is_err()
                || worker.stream.flush().is_err()
            {
                warn!("bridge output stream failed");
                self.output_good.store(false, Ordering::Release);
                return false;
            }
            self.forwarded_messages.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use weft_core::identifier::Identifier;

    /// In-memory byte pipe; reads report WouldBlock while empty.
    #[derive(Clone, Default)]
    struct TestPipe(Arc<Mutex<VecDeque<u8>>>);

    impl Read for TestPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut queue = self.0.lock();
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
            self.0.lock().extend(buf.iter().copied());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    fn test_msg_id(method: &str) -> MessageId {
        MessageId::new(Identifier::new("eagiTest"), Identifier::new(method))
    }

    #[test]
    fn test_state_round_trip_through_pipes() {
        let wire = TestPipe::default();

        let sender = BridgeState::new(4096);
        sender.start(Box::new(TestPipe::default()), Box::new(wire.clone()));

        let receiver = BridgeState::new(4096);
        receiver.start(Box::new(wire), Box::new(TestPipe::default()));

        let msg_id = test_msg_id("hello");
        let mut message = Message::with_payload(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        message.set_target_id(7).set_source_id(3).set_sequence_no(11);

        sender.push(msg_id, &message);
        sender.notify_output_ready();

        let mut received = Vec::new();
        wait_until(|| {
            receiver.fetch_messages(&mut |id, _age, msg| {
                received.push((id, msg.clone()));
                true
            });
            !received.is_empty()
        });

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, msg_id);
        assert_eq!(received[0].1.target_id, 7);
        assert_eq!(received[0].1.source_id, 3);
        assert_eq!(received[0].1.content(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(sender.forwarded_messages(), 1);
        assert_eq!(receiver.decode_errors(), 0);
    }

    #[test]
    fn test_state_counts_decode_errors() {
        let wire = TestPipe::default();
        {
            let mut writer = wire.clone();
            writer.write_all(b"definitely not base64!\n").unwrap();
        }

        let receiver = BridgeState::new(4096);
        receiver.start(Box::new(wire.clone()), Box::new(TestPipe::default()));

        wait_until(|| receiver.decode_errors() == 1);

        // A valid record after the bad line still decodes
        let msg_id = test_msg_id("after");
        let mut record = Vec::new();
        encode_record(msg_id, &Message::new(), &mut record).unwrap();
        wire.clone().write_all(&record).unwrap();

        let mut count = 0;
        wait_until(|| {
            receiver.fetch_messages(&mut |_, _, _| {
                count += 1;
                true
            });
            count == 1
        });
    }

    #[test]
    fn test_state_drops_overlong_records() {
        let wire = TestPipe::default();
        let receiver = BridgeState::new(64);

        // A giant line without newline, then its terminator, then a valid record
        let mut writer = wire.clone();
        writer.write_all(&vec![b'A'; 1024]).unwrap();
        receiver.start(Box::new(wire.clone()), Box::new(TestPipe::default()));
        wait_until(|| receiver.decode_errors() == 1);

        writer.write_all(b"\n").unwrap();
        let msg_id = test_msg_id("small");
        let mut record = Vec::new();
        encode_record(msg_id, &Message::new(), &mut record).unwrap();
        // A short record still fits the 64-byte budget check before decode
        assert!(record.len() <= 128);
        writer.write_all(&record).unwrap();

        let mut decoded = 0;
        wait_until(|| {
            receiver.fetch_messages(&mut |_, _, _| {
                decoded += 1;
                true
            });
            decoded >= 1
        });
        assert_eq!(receiver.decode_errors(), 1);
    }

    #[test]
    fn test_state_eof_marks_input_unusable() {
        struct Eof;
        impl Read for Eof {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
        }

        let state = BridgeState::new(4096);
        state.start(Box::new(Eof), Box::new(TestPipe::default()));
        wait_until(|| !state.input_usable());
        assert!(!state.is_usable());
    }

    #[test]
    fn test_state_drops_too_old_outgoing() {
        let wire = TestPipe::default();
        let state = BridgeState::new(4096);
        state.start(Box::new(TestPipe::default()), Box::new(wire));

        let mut stale = Message::new();
        stale.max_age = Duration::ZERO;
        stale.add_age(Duration::from_millis(1));
        state.push(test_msg_id("stale"), &stale);
        state.notify_output_ready();

        wait_until(|| state.dropped_messages() == 1);
        assert_eq!(state.forwarded_messages(), 0);
    }
}
