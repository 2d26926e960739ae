use std::{fmt, sync::Arc, time::Duration};

use crate::{constants::DEFAULT_MAX_MESSAGE_AGE, identifier::Identifier};

/// Numeric id of a bus endpoint, router or bridge.
pub type EndpointId = u64;

/// The reserved id of no endpoint.
pub const INVALID_ID: EndpointId = 0;

/// The reserved id addressing every endpoint.
pub const BROADCAST_ID: EndpointId = u64::MAX;

/// The immutable byte content of a message or blob fragment.
///
/// Broadcast routing hands the same content to every outgoing link, and
/// the bridge queues move it between threads; the bytes therefore live
/// behind a shared allocation, so copying an envelope copies a reference
/// and nothing can mutate content already in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    /// Creates an empty payload.
    pub fn empty() -> Self {
        Payload(Arc::from(Vec::new().into_boxed_slice()))
    }

    /// Returns the content bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the content length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when there is no content.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(Arc::from(bytes.into_boxed_slice()))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload(Arc::from(bytes))
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Pair of identifiers naming a message type: (class, method).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    /// The message class name.
    pub class: Identifier,
    /// The method name within the class.
    pub method: Identifier,
}

impl MessageId {
    /// Creates a message id from class and method identifiers.
    pub const fn new(class: Identifier, method: Identifier) -> Self {
        Self { class, method }
    }

    /// Returns true when the method name matches `method`.
    pub fn has_method(self, method: Identifier) -> bool {
        self.method == method
    }

    /// Returns true when both class and method are valid.
    pub fn is_valid(self) -> bool {
        self.class.is_valid() && self.method.is_valid()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({}.{})", self.class, self.method)
    }
}

/// Message delivery priority.
///
/// Higher priorities are dispatched first by the blob engine and may be
/// used by connections to order their queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Lowest priority, sent only when nothing else is queued.
    Idle,
    /// Below-normal priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Above-normal priority.
    High,
    /// Highest priority, typically control traffic.
    Critical,
}

impl Priority {
    /// Encodes the priority as a single byte.
    pub fn to_u8(self) -> u8 {
        match self {
            Priority::Idle => 0,
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    /// Decodes a priority byte; unknown values map to `Normal`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::Idle,
            1 => Priority::Low,
            3 => Priority::High,
            4 => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}

/// Bits describing which properties of a message were verified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerificationBits(u8);

impl VerificationBits {
    /// The source id was verified.
    pub const SOURCE_ID: VerificationBits = VerificationBits(1 << 0);
    /// The source presented a known certificate.
    pub const SOURCE_CERTIFICATE: VerificationBits = VerificationBits(1 << 1);
    /// The source proved possession of the certificate private key.
    pub const SOURCE_PRIVATE_KEY: VerificationBits = VerificationBits(1 << 2);
    /// The message id was verified.
    pub const MESSAGE_ID: VerificationBits = VerificationBits(1 << 3);

    /// All verification bits set.
    pub const ALL: VerificationBits = VerificationBits(0x0f);

    /// Creates verification bits from a raw byte.
    pub const fn from_bits(bits: u8) -> Self {
        VerificationBits(bits & 0x0f)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Adds the bits in `other` to this set.
    pub fn insert(&mut self, other: VerificationBits) {
        self.0 |= other.0;
    }

    /// Returns true when every bit in `other` is set in this set.
    pub const fn has_all(self, other: VerificationBits) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A message envelope carried over the bus.
///
/// The envelope identifies the target and source endpoints, carries a
/// request/response correlation sequence number, delivery priority, a hop
/// count incremented by every forwarding node, the accumulated age since
/// origination and the payload bytes. A message whose hop count exceeds the
/// configured limit or whose age exceeds its maximum is dropped by the
/// routing nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Id of the endpoint the message is addressed to, or [`BROADCAST_ID`].
    pub target_id: EndpointId,
    /// Id of the endpoint the message originated from.
    pub source_id: EndpointId,
    /// Request/response correlation number.
    pub sequence_no: u64,
    /// Delivery priority.
    pub priority: Priority,
    /// Number of routing nodes this message passed through.
    pub hop_count: u8,
    /// Accumulated time since the message was originated.
    pub age: Duration,
    /// Age limit after which the message is dropped.
    pub max_age: Duration,
    /// Which message properties have been verified.
    pub verification: VerificationBits,
    /// The payload bytes.
    pub payload: Payload,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            target_id: INVALID_ID,
            source_id: INVALID_ID,
            sequence_no: 0,
            priority: Priority::Normal,
            hop_count: 0,
            age: Duration::ZERO,
            max_age: DEFAULT_MAX_MESSAGE_AGE,
            verification: VerificationBits::default(),
            payload: Payload::empty(),
        }
    }
}

impl Message {
    /// Creates an empty message with default envelope fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message carrying the given payload.
    pub fn with_payload(payload: impl Into<Payload>) -> Self {
        Self { payload: payload.into(), ..Self::default() }
    }

    /// Sets the target endpoint id.
    pub fn set_target_id(&mut self, id: EndpointId) -> &mut Self {
        self.target_id = id;
        self
    }

    /// Sets the source endpoint id.
    pub fn set_source_id(&mut self, id: EndpointId) -> &mut Self {
        self.source_id = id;
        self
    }

    /// Sets the correlation sequence number.
    pub fn set_sequence_no(&mut self, sequence_no: u64) -> &mut Self {
        self.sequence_no = sequence_no;
        self
    }

    /// Sets the delivery priority.
    pub fn set_priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Configures this message as a response to `request`.
    ///
    /// The target becomes the request's source, the sequence number is
    /// echoed, and the priority is raised to at least the request's.
    pub fn setup_response(&mut self, request: &Message) -> &mut Self {
        self.target_id = request.source_id;
        self.sequence_no = request.sequence_no;
        if self.priority < request.priority {
            self.priority = request.priority;
        }
        self
    }

    /// Increments the hop counter.
    pub fn add_hop(&mut self) -> &mut Self {
        self.hop_count = self.hop_count.saturating_add(1);
        self
    }

    /// Returns true when the hop counter exceeds `limit`.
    pub fn too_many_hops(&self, limit: u8) -> bool {
        self.hop_count >= limit
    }

    /// Adds `increment` to the accumulated message age.
    pub fn add_age(&mut self, increment: Duration) -> &mut Self {
        self.age = self.age.saturating_add(increment);
        self
    }

    /// Returns true when the accumulated age exceeds the maximum age.
    pub fn too_old(&self) -> bool {
        self.age > self.max_age
    }

    /// Returns the payload bytes.
    pub fn content(&self) -> &[u8] {
        self.payload.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults() {
        let msg = Message::new();
        assert_eq!(msg.target_id, INVALID_ID);
        assert_eq!(msg.source_id, INVALID_ID);
        assert_eq!(msg.hop_count, 0);
        assert_eq!(msg.priority, Priority::Normal);
        assert!(!msg.too_old());
    }

    #[test]
    fn test_message_setup_response() {
        let mut request = Message::new();
        request.set_source_id(42).set_target_id(7).set_sequence_no(99);
        request.set_priority(Priority::High);

        let mut response = Message::new();
        response.setup_response(&request);
        assert_eq!(response.target_id, 42);
        assert_eq!(response.sequence_no, 99);
        assert_eq!(response.priority, Priority::High);
    }

    #[test]
    fn test_message_hop_limit() {
        let mut msg = Message::new();
        assert!(!msg.too_many_hops(2));
        msg.add_hop();
        msg.add_hop();
        assert!(msg.too_many_hops(2));
    }

    #[test]
    fn test_message_age_limit() {
        let mut msg = Message::new();
        msg.max_age = Duration::from_millis(100);
        msg.add_age(Duration::from_millis(60));
        assert!(!msg.too_old());
        msg.add_age(Duration::from_millis(60));
        assert!(msg.too_old());
    }

    #[test]
    fn test_priority_codec() {
        for p in [
            Priority::Idle,
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(Priority::from_u8(p.to_u8()), p);
        }
        assert_eq!(Priority::from_u8(200), Priority::Normal);
    }

    #[test]
    fn test_payload_clones_share_content() {
        let payload = Payload::from(vec![1, 2, 3]);
        let copy = payload.clone();
        assert_eq!(copy, payload);
        assert!(Arc::ptr_eq(&payload.0, &copy.0));
        assert_eq!(copy.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_payload_empty() {
        let payload = Payload::empty();
        assert!(payload.is_empty());
        assert_eq!(payload.len(), 0);
        assert_eq!(payload, Payload::default());
    }

    #[test]
    fn test_verification_bits() {
        let mut bits = VerificationBits::default();
        assert!(!bits.has_all(VerificationBits::SOURCE_ID));
        bits.insert(VerificationBits::SOURCE_ID);
        bits.insert(VerificationBits::MESSAGE_ID);
        assert!(bits.has_all(VerificationBits::SOURCE_ID));
        assert!(!bits.has_all(VerificationBits::ALL));
    }
}
