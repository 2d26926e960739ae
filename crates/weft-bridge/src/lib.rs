#![warn(missing_docs)]

//! weft-bridge: joins two routers through a byte-stream transport.
//!
//! A bridge couples one local connection (to a neighboring router) with a
//! pair of byte streams carrying newline-terminated base64 records. Two
//! worker threads own the stream ends: the input thread scans, decodes and
//! queues records; the output thread drains and encodes queued messages
//! when signaled. The bridge object itself runs on the bus thread and
//! plays the router's role for the connection side.

/// The shared bridge state and its I/O worker threads.
pub mod state;

/// The bridge node.
pub mod bridge;

pub use bridge::Bridge;
pub use state::BridgeState;
