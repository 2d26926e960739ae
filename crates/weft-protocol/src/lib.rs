#![warn(missing_docs)]

//! weft-protocol: wire codec and protocol vocabulary.
//!
//! This crate defines how messages and their control payloads are encoded
//! for transmission:
//! - the binary message header codec
//! - payload codecs for topology, statistics, flow and blob control data
//! - the special message vocabulary interpreted by routers and bridges
//! - line-oriented base64 framing used by stream bridges

/// Binary message header encoding/decoding.
pub mod codec;
/// Line-oriented base64 record framing for stream bridges.
pub mod framing;
/// Wire payload codecs for control messages.
pub mod payload;
/// The special message vocabulary and shutdown requests.
pub mod special;

pub use codec::{decode_message, encode_message};
pub use framing::{decode_record, encode_record};
pub use payload::{
    BlobFragment, BlobPrepareInfo, BlobResendRequest, BridgeStatistics, BridgeTopologyInfo,
    EndpointStatistics, MessageFlowInfo, RouterStatistics, RouterTopologyInfo,
};
pub use special::{is_special, ShutdownRequest, MSGBUS_CLASS};
