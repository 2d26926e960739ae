#![warn(missing_docs)]

//! weft-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core types shared across all layers:
//! - Identifiers and message ids
//! - The message envelope (priority, hops, age, payload)
//! - Connection and acceptor traits
//! - Configuration types
//! - Error handling
//!
//! Protocol-specific logic lives in specialized crates:
//! - `weft-protocol`: header codec, wire payloads, special vocabulary, framing
//! - `weft-blob`: bulk transfer engine and blob I/O
//! - `weft-router` / `weft-bridge`: the forwarding nodes themselves

/// Protocol constants shared across layers.
pub mod constants {
    use std::time::Duration;

    /// Default number of endpoint ids reserved by a single router.
    pub const DEFAULT_ID_COUNT: u64 = 1 << 12;
    /// Maximum number of hops before a message is dropped.
    pub const DEFAULT_MAX_HOPS: u8 = 64;
    /// Default maximum age of a message before it is dropped.
    pub const DEFAULT_MAX_MESSAGE_AGE: Duration = Duration::from_secs(30);
    /// The smallest payload size every connection must support.
    ///
    /// Used as the fragment size for control blobs when the concrete
    /// connection does not advertise a larger one.
    pub const MIN_CONNECTION_DATA_SIZE: usize = 1024;
    /// Payload size advertised by the in-process direct connection.
    pub const DIRECT_DATA_SIZE: usize = 64 * 1024;
}

/// Configuration options for routers, bridges and the blob engine.
pub mod config;
/// Connection and acceptor traits plus connection statistics.
pub mod connection;
/// In-process connection pair and acceptor.
pub mod direct;
/// Error types and results.
pub mod error;
/// Compact 64-bit identifiers with printable names.
pub mod identifier;
/// The message envelope and related types.
pub mod message;
/// Timeout and smoothed-average utilities.
pub mod time;

pub use config::{BlobConfig, BridgeConfig, RouterConfig, ShutdownConfig};
pub use connection::{Acceptor, Connection, ConnectionKind, ConnectionStatistics};
pub use direct::{DirectAcceptor, DirectConnection, DirectConnector};
pub use error::{Error, Result};
pub use identifier::Identifier;
pub use message::{
    EndpointId, Message, MessageId, Payload, Priority, VerificationBits, BROADCAST_ID, INVALID_ID,
};
pub use time::{idle_pause, SlidingAverage, Timeout};
