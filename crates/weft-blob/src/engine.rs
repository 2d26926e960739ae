//! The blob transfer engine.
//!
//! One engine instance owns every blob a node is currently sending or
//! receiving. The owning node drives it by feeding incoming fragment and
//! resend messages, giving it send opportunities with a per-call message
//! budget, and ticking `update` from its maintenance pass.

use std::{
    collections::VecDeque,
    time::Duration,
};

use tracing::{debug, trace, warn};

use weft_core::{
    config::BlobConfig,
    message::{EndpointId, Message, MessageId, Payload, Priority},
    time::Timeout,
};
use weft_protocol::{
    payload::{BlobFragment, BlobPrepareInfo, BlobResendRequest},
    special,
};

use crate::io::{BlobInfo, SourceBlobIo, TargetBlobIo};

/// Id assigned to a blob by the target side of the transfer.
pub type BlobId = u64;

/// Callback used by the engine to post messages toward the bus.
pub type SendHandler<'a> = &'a mut dyn FnMut(MessageId, &Message) -> bool;

/// Callback building a default target I/O for unexpected incoming blobs.
///
/// Receives the content message id and the total size; returning `None`
/// rejects the blob.
pub type TargetIoFactory<'a> = &'a mut dyn FnMut(MessageId, u64) -> Option<Box<dyn TargetBlobIo>>;

/// Bytes of fragment payload overhead: content id, blob id, offset, total
/// size and the data length prefix.
const FRAGMENT_OVERHEAD: usize = 8 + 8 + 8 + 8 + 4;

/// Fallback deadline for blobs that arrive without an expectation.
const DEFAULT_INCOMING_MAX_TIME: Duration = Duration::from_secs(60);

struct OutgoingBlob {
    content_id: MessageId,
    source_id: EndpointId,
    target_id: EndpointId,
    blob_id: BlobId,
    io: Box<dyn SourceBlobIo>,
    total_size: u64,
    todo: VecDeque<(u64, u64)>,
    priority: Priority,
    max_time: Timeout,
    prepared: bool,
    completed: bool,
}

struct IncomingBlob {
    content_id: MessageId,
    source_id: EndpointId,
    target_id: EndpointId,
    blob_id: BlobId,
    io: Box<dyn TargetBlobIo>,
    total_size: Option<u64>,
    covered: Vec<(u64, u64)>,
    priority: Priority,
    max_time: Timeout,
    resend_delay: Timeout,
}

impl IncomingBlob {
    fn info(&self) -> BlobInfo {
        BlobInfo {
            total_size: self.total_size.unwrap_or(0),
            priority: self.priority,
        }
    }

    fn covered_length(&self) -> u64 {
        self.covered.iter().map(|(start, end)| end - start).sum()
    }

    fn is_complete(&self) -> bool {
        match self.total_size {
            Some(total) => self.covered_length() >= total,
            None => false,
        }
    }

    /// First missing range below the known total size.
    fn first_gap(&self) -> Option<(u64, u64)> {
        let total = self.total_size?;
        let mut expected = 0;
        for &(start, end) in &self.covered {
            if start > expected {
                return Some((expected, start));
            }
            expected = expected.max(end);
        }
        if expected < total {
            return Some((expected, total));
        }
        None
    }

    fn insert_range(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.covered.push((start, end));
        self.covered.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.covered.len());
        for &(start, end) in &self.covered {
            match merged.last_mut() {
                Some((_, last_end)) if start <= *last_end => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        self.covered = merged;
    }

    fn is_covered(&self, start: u64, end: u64) -> bool {
        self.covered
            .iter()
            .any(|&(s, e)| s <= start && end <= e)
    }
}

/// Manages all outgoing and incoming blob transfers of one bus node.
pub struct BlobEngine {
    fragment_id: MessageId,
    resend_id: MessageId,
    prepare_id: MessageId,
    config: BlobConfig,
    outgoing: Vec<OutgoingBlob>,
    incoming: Vec<IncomingBlob>,
    finished: VecDeque<(MessageId, Message)>,
}

impl BlobEngine {
    /// Creates an engine using custom envelope ids for fragment, resend
    /// and prepare messages.
    pub fn new(
        fragment_id: MessageId,
        resend_id: MessageId,
        prepare_id: MessageId,
        config: BlobConfig,
    ) -> Self {
        Self {
            fragment_id,
            resend_id,
            prepare_id,
            config,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            finished: VecDeque::new(),
        }
    }

    /// Creates an engine speaking the bus special-message vocabulary.
    pub fn for_bus(config: BlobConfig) -> Self {
        Self::new(
            special::BLOB_FRAGMENT,
            special::BLOB_RESEND,
            special::BLOB_PREPARE,
            config,
        )
    }

    /// Returns true while any outgoing transfer still has work.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Returns true while any incoming transfer is pending.
    pub fn has_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }

    /// Enqueues an outgoing transfer of the data provided by `io`.
    pub fn push_outgoing(
        &mut self,
        content_id: MessageId,
        source_id: EndpointId,
        target_id: EndpointId,
        blob_id: BlobId,
        mut io: Box<dyn SourceBlobIo>,
        max_time: Duration,
        priority: Priority,
    ) {
        let total_size = io.total_size();
        let mut todo = VecDeque::with_capacity(1);
        // An empty blob still sends one empty fragment so the target learns
        // the total size and completes
        todo.push_back((0, total_size));
        self.outgoing.push(OutgoingBlob {
            content_id,
            source_id,
            target_id,
            blob_id,
            io,
            total_size,
            todo,
            priority,
            max_time: Timeout::new(max_time),
            prepared: false,
            completed: false,
        });
    }

    /// Installs a receiver for an expected incoming transfer.
    pub fn expect_incoming(
        &mut self,
        content_id: MessageId,
        source_id: EndpointId,
        blob_id: BlobId,
        io: Box<dyn TargetBlobIo>,
        max_time: Duration,
    ) {
        self.incoming.push(IncomingBlob {
            content_id,
            source_id,
            target_id: weft_core::message::INVALID_ID,
            blob_id,
            io,
            total_size: None,
            covered: Vec::new(),
            priority: Priority::Normal,
            max_time: Timeout::new(max_time),
            resend_delay: Timeout::new(self.config.resend_delay),
        });
    }

    /// Cancels a pending incoming transfer, invoking its cancellation
    /// callback. Returns true when a transfer was found.
    pub fn cancel_incoming(&mut self, blob_id: BlobId) -> bool {
        let mut found = false;
        self.incoming.retain_mut(|blob| {
            if blob.blob_id == blob_id {
                blob.io.handle_cancelled();
                found = true;
                false
            } else {
                true
            }
        });
        found
    }

    /// Fragments and posts the highest-priority eligible outgoing transfer
    /// through `send`, limited to `max_messages` messages of at most
    /// `max_message_size` payload bytes each.
    pub fn process_outgoing(
        &mut self,
        send: SendHandler,
        max_message_size: usize,
        max_messages: usize,
    ) -> bool {
        if max_message_size <= FRAGMENT_OVERHEAD {
            return false;
        }
        let budget = max_message_size - FRAGMENT_OVERHEAD;

        let Some(index) = self
            .outgoing
            .iter()
            .enumerate()
            .filter(|(_, blob)| {
                !blob.max_time.is_expired() && (!blob.prepared || !blob.todo.is_empty())
            })
            .max_by_key(|(_, blob)| blob.priority)
            .map(|(index, _)| index)
        else {
            return false;
        };

        let blob = &mut self.outgoing[index];
        let mut sent = 0;
        let mut buffer = vec![0u8; budget];

        while sent < max_messages {
            if !blob.prepared {
                let prepare = BlobPrepareInfo {
                    content_id: blob.content_id,
                    blob_id: blob.blob_id,
                    total_size: blob.total_size,
                    info: Vec::new(),
                };
                let mut payload = Vec::new();
                if prepare.encode(&mut payload).is_err() {
                    break;
                }
                let mut message = Message::with_payload(payload);
                message.set_target_id(blob.target_id);
                message.set_source_id(blob.source_id);
                message.set_sequence_no(blob.blob_id);
                message.set_priority(blob.priority);
                if !send(self.prepare_id, &message) {
                    break;
                }
                blob.prepared = true;
                sent += 1;
                continue;
            }

            let Some((start, end)) = blob.todo.pop_front() else {
                break;
            };
            let window = ((end - start) as usize).min(budget);
            let fetched = blob.io.fetch_fragment(start, &mut buffer[..window]);
            if fetched < window && start + fetched as u64 != end {
                trace!(
                    blob = blob.blob_id,
                    offset = start,
                    "blob source provided a short fragment",
                );
            }

            let fragment = BlobFragment {
                content_id: blob.content_id,
                blob_id: blob.blob_id,
                offset: start,
                total_size: blob.total_size,
                data: Payload::from(&buffer[..fetched]),
            };
            let mut payload = Vec::with_capacity(FRAGMENT_OVERHEAD + fetched);
            if fragment.encode(&mut payload).is_err() {
                break;
            }
            let mut message = Message::with_payload(payload);
            message.set_target_id(blob.target_id);
            message.set_source_id(blob.source_id);
            message.set_sequence_no(blob.blob_id);
            message.set_priority(blob.priority);

            if !send(self.fragment_id, &message) {
                blob.todo.push_front((start, end));
                break;
            }
            sent += 1;

            let next = start + fetched as u64;
            if next < end {
                blob.todo.push_front((next, end));
            } else if fetched == 0 {
                // Source is exhausted; nothing more will come for this range
                break;
            }
        }

        // The transfer stays installed until its deadline so that resend
        // requests for lost fragments can still be served
        if blob.todo.is_empty() && blob.prepared && !blob.completed {
            blob.completed = true;
            debug!(
                blob = blob.blob_id,
                target = blob.target_id,
                size = blob.total_size,
                "finished sending blob",
            );
        }
        sent > 0
    }

    /// Feeds one received fragment, prepare or resend message into the
    /// engine. Returns true when the message was consumed.
    pub fn process_incoming(
        &mut self,
        factory: TargetIoFactory,
        msg_id: MessageId,
        message: &Message,
    ) -> bool {
        if msg_id == self.fragment_id {
            return self.handle_fragment(factory, message);
        }
        if msg_id == self.prepare_id {
            return self.handle_prepare(factory, message);
        }
        if msg_id == self.resend_id {
            return self.process_resend(message);
        }
        false
    }

    fn find_or_install_incoming(
        &mut self,
        factory: TargetIoFactory,
        content_id: MessageId,
        source_id: EndpointId,
        blob_id: BlobId,
        total_size: u64,
    ) -> Option<usize> {
        if let Some(index) = self
            .incoming
            .iter()
            .position(|blob| blob.source_id == source_id && blob.blob_id == blob_id)
        {
            return Some(index);
        }
        let io = factory(content_id, total_size)?;
        self.incoming.push(IncomingBlob {
            content_id,
            source_id,
            target_id: weft_core::message::INVALID_ID,
            blob_id,
            io,
            total_size: None,
            covered: Vec::new(),
            priority: Priority::Normal,
            max_time: Timeout::new(DEFAULT_INCOMING_MAX_TIME),
            resend_delay: Timeout::new(self.config.resend_delay),
        });
        Some(self.incoming.len() - 1)
    }

    fn handle_fragment(&mut self, factory: TargetIoFactory, message: &Message) -> bool {
        let fragment = match BlobFragment::decode(message.content()) {
            Ok(fragment) => fragment,
            Err(error) => {
                warn!(%error, "discarding undecodable blob fragment");
                return true;
            }
        };
        let Some(index) = self.find_or_install_incoming(
            factory,
            fragment.content_id,
            message.source_id,
            fragment.blob_id,
            fragment.total_size,
        ) else {
            return true;
        };

        let blob = &mut self.incoming[index];
        if !blob.content_id.is_valid() {
            blob.content_id = fragment.content_id;
        }
        match blob.total_size {
            Some(total) if total != fragment.total_size => {
                warn!(
                    blob = blob.blob_id,
                    expected = total,
                    received = fragment.total_size,
                    "mismatching blob total size in fragment",
                );
                return true;
            }
            _ => blob.total_size = Some(fragment.total_size),
        }
        blob.target_id = message.target_id;
        blob.priority = message.priority;
        blob.resend_delay.reset();

        let start = fragment.offset;
        let end = start + fragment.data.len() as u64;
        let info = blob.info();
        if blob.is_covered(start, end) {
            if !blob.io.check_stored(start, fragment.data.as_slice()) {
                warn!(blob = blob.blob_id, offset = start, "stored fragment mismatch");
            }
        } else {
            if !blob.io.store_fragment(start, fragment.data.as_slice(), &info) {
                warn!(blob = blob.blob_id, offset = start, "failed to store blob fragment");
                return true;
            }
            blob.insert_range(start, end);
        }
        true
    }

    fn handle_prepare(&mut self, factory: TargetIoFactory, message: &Message) -> bool {
        let prepare = match BlobPrepareInfo::decode(message.content()) {
            Ok(prepare) => prepare,
            Err(error) => {
                warn!(%error, "discarding undecodable blob prepare record");
                return true;
            }
        };
        let Some(index) = self.find_or_install_incoming(
            factory,
            prepare.content_id,
            message.source_id,
            prepare.blob_id,
            prepare.total_size,
        ) else {
            return true;
        };
        let blob = &mut self.incoming[index];
        if blob.total_size.is_none() {
            blob.total_size = Some(prepare.total_size);
        }
        blob.target_id = message.target_id;
        true
    }

    /// Handles a resend request for an outgoing transfer.
    pub fn process_resend(&mut self, message: &Message) -> bool {
        let request = match BlobResendRequest::decode(message.content()) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "discarding undecodable blob resend request");
                return true;
            }
        };
        if let Some(blob) = self
            .outgoing
            .iter_mut()
            .find(|blob| blob.blob_id == request.blob_id && blob.target_id == message.source_id)
        {
            let start = request.offset.min(blob.total_size);
            let end = (request.offset + request.length).min(blob.total_size);
            if start < end {
                debug!(
                    blob = blob.blob_id,
                    offset = start,
                    length = end - start,
                    "re-dispatching requested blob window",
                );
                blob.todo.push_front((start, end));
            }
        }
        true
    }

    /// Completes every fully covered incoming transfer, invoking each
    /// target's finished callback exactly once. Returns the number of
    /// completed transfers.
    pub fn handle_complete(&mut self) -> usize {
        let mut completed = 0;
        let mut index = 0;
        while index < self.incoming.len() {
            if self.incoming[index].is_complete() {
                let mut blob = self.incoming.remove(index);
                let info = blob.info();
                blob.io.handle_finished(blob.content_id, &info);
                completed += 1;
                if let Some(bytes) = blob.io.take_buffer() {
                    let mut message = Message::with_payload(bytes);
                    message.set_source_id(blob.source_id);
                    message.set_target_id(blob.target_id);
                    message.set_sequence_no(blob.blob_id);
                    message.set_priority(blob.priority);
                    self.finished.push_back((blob.content_id, message));
                }
            } else {
                index += 1;
            }
        }
        completed
    }

    /// Drains finished buffered blobs as regular messages.
    pub fn fetch_all(&mut self, handler: &mut dyn FnMut(MessageId, &Message) -> bool) -> bool {
        let mut fetched = false;
        while let Some((msg_id, message)) = self.finished.pop_front() {
            fetched = true;
            handler(msg_id, &message);
        }
        fetched
    }

    /// Expires overdue transfers and requests resends for stale gaps.
    ///
    /// `send` is used to post resend requests toward blob senders.
    pub fn update(&mut self, send: SendHandler) -> bool {
        let mut worked = false;

        self.outgoing.retain(|blob| {
            if blob.max_time.is_expired() {
                warn!(blob = blob.blob_id, target = blob.target_id, "outgoing blob expired");
                worked = true;
                false
            } else {
                true
            }
        });

        let resend_id = self.resend_id;
        self.incoming.retain_mut(|blob| {
            if blob.max_time.is_expired() {
                warn!(blob = blob.blob_id, source = blob.source_id, "incoming blob expired");
                blob.io.handle_cancelled();
                worked = true;
                return false;
            }
            if blob.resend_delay.is_expired() {
                if let Some((start, end)) = blob.first_gap() {
                    let request = BlobResendRequest {
                        blob_id: blob.blob_id,
                        offset: start,
                        length: end - start,
                    };
                    let mut payload = Vec::new();
                    if request.encode(&mut payload).is_ok() {
                        let mut message = Message::with_payload(payload);
                        message.set_target_id(blob.source_id);
                        message.set_sequence_no(blob.blob_id);
                        message.set_priority(Priority::High);
                        worked |= send(resend_id, &message);
                    }
                }
                blob.resend_delay.reset();
            }
            true
        });

        worked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufferSource, BufferTarget};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use weft_core::identifier::Identifier;

    fn test_engine() -> BlobEngine {
        BlobEngine::new(
            MessageId::new(Identifier::new("test"), Identifier::new("send")),
            MessageId::new(Identifier::new("test"), Identifier::new("resend")),
            MessageId::new(Identifier::new("test"), Identifier::new("prepare")),
            BlobConfig::default(),
        )
    }

    struct CountingTarget {
        inner: BufferTarget,
        finished: Arc<AtomicUsize>,
        cancelled: Arc<AtomicUsize>,
    }

    impl TargetBlobIo for CountingTarget {
        fn store_fragment(&mut self, offset: u64, data: &[u8], info: &BlobInfo) -> bool {
            self.inner.store_fragment(offset, data, info)
        }

        fn check_stored(&mut self, offset: u64, data: &[u8]) -> bool {
            self.inner.check_stored(offset, data)
        }

        fn handle_finished(&mut self, msg_id: MessageId, info: &BlobInfo) {
            self.inner.handle_finished(msg_id, info);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_cancelled(&mut self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }

        fn take_buffer(&mut self) -> Option<Vec<u8>> {
            self.inner.take_buffer()
        }
    }

    fn round_trip(size: usize, fragment_size: usize, budget: usize) -> (Vec<u8>, usize) {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("roundtrip"));
        let mut sender = test_engine();
        let mut receiver = test_engine();

        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        sender.push_outgoing(
            content_id,
            1,
            2,
            42,
            Box::new(BufferSource::new(data.clone())),
            Duration::from_secs(3600),
            Priority::Normal,
        );

        let finished = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        receiver.expect_incoming(
            content_id,
            1,
            42,
            Box::new(CountingTarget {
                inner: BufferTarget::new(size as u64),
                finished: finished.clone(),
                cancelled: cancelled.clone(),
            }),
            Duration::from_secs(3600),
        );

        let mut guard = 0;
        while receiver.has_incoming() {
            let mut transfers: Vec<(MessageId, Message)> = Vec::new();
            sender.process_outgoing(
                &mut |msg_id, message| {
                    transfers.push((msg_id, message.clone()));
                    true
                },
                fragment_size,
                budget,
            );
            for (msg_id, message) in &transfers {
                receiver.process_incoming(&mut |_, _| None, *msg_id, message);
            }
            receiver.handle_complete();
            guard += 1;
            assert!(guard < 100_000, "transfer did not converge");
        }

        assert_eq!(cancelled.load(Ordering::SeqCst), 0);

        let mut content = Vec::new();
        receiver.fetch_all(&mut |_, message| {
            content = message.content().to_vec();
            true
        });
        assert_eq!(content, data);
        (content, finished.load(Ordering::SeqCst))
    }

    #[test]
    fn test_round_trip_small() {
        let (content, finishes) = round_trip(4096, 512, 2);
        assert_eq!(content.len(), 4096);
        assert_eq!(finishes, 1);
    }

    #[test]
    fn test_round_trip_single_byte() {
        let (content, finishes) = round_trip(1, 512, 2);
        assert_eq!(content.len(), 1);
        assert_eq!(finishes, 1);
    }

    #[test]
    fn test_round_trip_empty() {
        let (content, finishes) = round_trip(0, 512, 2);
        assert!(content.is_empty());
        assert_eq!(finishes, 1);
    }

    #[test]
    fn test_resend_refills_missing_window() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("gap"));
        let mut sender = test_engine();

        sender.push_outgoing(
            content_id,
            1,
            2,
            7,
            Box::new(BufferSource::new(vec![0xabu8; 2048])),
            Duration::from_secs(3600),
            Priority::Normal,
        );

        // Drain the whole blob, dropping every message
        let mut drops = 0;
        while sender.process_outgoing(
            &mut |_, _| {
                drops += 1;
                true
            },
            512,
            8,
        ) {}
        assert!(drops > 0);

        // A resend request from the target revives the window
        let request = BlobResendRequest { blob_id: 7, offset: 512, length: 256 };
        let mut payload = Vec::new();
        request.encode(&mut payload).unwrap();
        let mut message = Message::with_payload(payload);
        message.set_source_id(2);
        sender.process_resend(&message);

        let mut resent = Vec::new();
        sender.process_outgoing(
            &mut |_, message| {
                resent.push(BlobFragment::decode(message.content()).unwrap());
                true
            },
            512,
            8,
        );
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].offset, 512);
        assert_eq!(resent[0].data.len(), 256);
        assert!(resent[0].data.as_slice().iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_resend_from_unknown_peer_ignored() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("stranger"));
        let mut sender = test_engine();
        sender.push_outgoing(
            content_id,
            1,
            2,
            7,
            Box::new(BufferSource::new(vec![0u8; 64])),
            Duration::from_secs(10),
            Priority::Normal,
        );
        while sender.process_outgoing(&mut |_, _| true, 512, 8) {}

        // Resend request from a different endpoint does not match
        let request = BlobResendRequest { blob_id: 7, offset: 0, length: 64 };
        let mut payload = Vec::new();
        request.encode(&mut payload).unwrap();
        let mut message = Message::with_payload(payload);
        message.set_source_id(99);
        sender.process_resend(&message);
        assert!(!sender.process_outgoing(&mut |_, _| true, 512, 8));
    }

    #[test]
    fn test_gap_detection_requests_resend() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("sparse"));
        let mut receiver = BlobEngine::new(
            MessageId::new(Identifier::new("test"), Identifier::new("send")),
            MessageId::new(Identifier::new("test"), Identifier::new("resend")),
            MessageId::new(Identifier::new("test"), Identifier::new("prepare")),
            BlobConfig { resend_delay: Duration::ZERO, ..Default::default() },
        );

        receiver.expect_incoming(
            content_id,
            1,
            9,
            Box::new(BufferTarget::new(1024)),
            Duration::from_secs(3600),
        );

        // Deliver only the second half
        let fragment = BlobFragment {
            content_id,
            blob_id: 9,
            offset: 512,
            total_size: 1024,
            data: Payload::from(vec![1u8; 512]),
        };
        let mut payload = Vec::new();
        fragment.encode(&mut payload).unwrap();
        let mut message = Message::with_payload(payload);
        message.set_source_id(1).set_target_id(2);

        let fragment_id = MessageId::new(Identifier::new("test"), Identifier::new("send"));
        assert!(receiver.process_incoming(&mut |_, _| None, fragment_id, &message));

        let mut requests = Vec::new();
        receiver.update(&mut |msg_id, message| {
            requests.push((msg_id, message.clone()));
            true
        });
        assert_eq!(requests.len(), 1);
        let request = BlobResendRequest::decode(requests[0].1.content()).unwrap();
        assert_eq!(request.blob_id, 9);
        assert_eq!(request.offset, 0);
        assert_eq!(request.length, 512);
        // Request is addressed back to the blob sender
        assert_eq!(requests[0].1.target_id, 1);
    }

    #[test]
    fn test_expiry_cancels_incoming_once() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("expire"));
        let mut receiver = test_engine();

        let finished = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        receiver.expect_incoming(
            content_id,
            1,
            11,
            Box::new(CountingTarget {
                inner: BufferTarget::new(16),
                finished: finished.clone(),
                cancelled: cancelled.clone(),
            }),
            Duration::ZERO,
        );

        receiver.update(&mut |_, _| true);
        receiver.update(&mut |_, _| true);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(!receiver.has_incoming());
    }

    #[test]
    fn test_cancel_incoming_notifies_target() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("dropit"));
        let mut receiver = test_engine();

        let finished = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        receiver.expect_incoming(
            content_id,
            1,
            13,
            Box::new(CountingTarget {
                inner: BufferTarget::new(16),
                finished: finished.clone(),
                cancelled: cancelled.clone(),
            }),
            Duration::from_secs(60),
        );

        assert!(receiver.cancel_incoming(13));
        assert!(!receiver.cancel_incoming(13));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(!receiver.has_incoming());
    }

    #[test]
    fn test_unexpected_blob_uses_factory() {
        let content_id = MessageId::new(Identifier::new("test"), Identifier::new("surprise"));
        let mut receiver = test_engine();

        let fragment = BlobFragment {
            content_id,
            blob_id: 3,
            offset: 0,
            total_size: 4,
            data: Payload::from(vec![1, 2, 3, 4]),
        };
        let mut payload = Vec::new();
        fragment.encode(&mut payload).unwrap();
        let mut message = Message::with_payload(payload);
        message.set_source_id(5).set_target_id(6);

        let fragment_id = MessageId::new(Identifier::new("test"), Identifier::new("send"));
        let mut factory_calls = 0;
        receiver.process_incoming(
            &mut |msg_id, size| {
                factory_calls += 1;
                assert_eq!(msg_id, content_id);
                assert_eq!(size, 4);
                Some(Box::new(BufferTarget::new(size)))
            },
            fragment_id,
            &message,
        );
        assert_eq!(factory_calls, 1);
        assert_eq!(receiver.handle_complete(), 1);

        let mut delivered = Vec::new();
        receiver.fetch_all(&mut |msg_id, message| {
            delivered.push((msg_id, message.content().to_vec()));
            true
        });
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, content_id);
        assert_eq!(delivered[0].1, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_priority_orders_outgoing() {
        let mut sender = test_engine();
        let low_id = MessageId::new(Identifier::new("test"), Identifier::new("low"));
        let high_id = MessageId::new(Identifier::new("test"), Identifier::new("high"));

        sender.push_outgoing(
            low_id,
            1,
            2,
            1,
            Box::new(BufferSource::new(vec![0u8; 64])),
            Duration::from_secs(10),
            Priority::Low,
        );
        sender.push_outgoing(
            high_id,
            1,
            2,
            2,
            Box::new(BufferSource::new(vec![0u8; 64])),
            Duration::from_secs(10),
            Priority::Critical,
        );

        let mut first_content = None;
        sender.process_outgoing(
            &mut |_, message| {
                if first_content.is_none() {
                    first_content = Some(message.sequence_no);
                }
                true
            },
            512,
            1,
        );
        // The critical blob (blob id 2) goes out first
        assert_eq!(first_content, Some(2));
    }
}
