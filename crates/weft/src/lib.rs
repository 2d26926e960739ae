#![warn(missing_docs)]

//! Weft: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports
//! the most commonly used types to build routed message bus apps:
//!
//! - Router and bridge nodes (`Router`, `Bridge`)
//! - The message model (`Message`, `MessageId`, `Identifier`, `Priority`)
//! - Connection plumbing (`Connection`, `Acceptor`, `DirectAcceptor`)
//! - Blob transfers (`BlobEngine`, blob I/O traits)
//! - Remote node tracking (`RemoteNodeTracker`)
//!
//! Example
//! ```ignore
//! use weft::{DirectAcceptor, Router, RouterConfig};
//!
//! let mut router = Router::new(RouterConfig::default());
//! let acceptor = DirectAcceptor::new();
//! let connector = acceptor.connector();
//! router.add_acceptor(Box::new(acceptor));
//!
//! // Attach endpoints through `connector` from anywhere in the process,
//! // then drive the router:
//! let mut idle_streak = 0;
//! loop {
//!     if router.update(2) {
//!         idle_streak = 0;
//!     } else {
//!         idle_streak += 1;
//!         weft::idle_pause(idle_streak);
//!     }
//!     if router.is_done() {
//!         break;
//!     }
//! }
//! ```

// Core message model and connection plumbing
pub use weft_core::{
    idle_pause, Acceptor, BlobConfig, BridgeConfig, Connection, ConnectionKind,
    ConnectionStatistics, DirectAcceptor, DirectConnection, DirectConnector, EndpointId, Error,
    Identifier, Message, MessageId, Payload, Priority, Result, RouterConfig, ShutdownConfig,
    Timeout, VerificationBits, BROADCAST_ID, INVALID_ID,
};
// Routing nodes
pub use weft_bridge::Bridge;
pub use weft_router::Router;
// The special-message vocabulary
pub use weft_protocol::special;
// Blob transfers
pub use weft_blob::{BlobEngine, BlobId, SourceBlobIo, TargetBlobIo};
// Remote node tracking
pub use weft_tracker::RemoteNodeTracker;

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Acceptor, Bridge, Connection, ConnectionKind, DirectAcceptor, DirectConnection,
        DirectConnector, EndpointId, Identifier, Message, MessageId, Payload, Priority, Router,
        RouterConfig, BROADCAST_ID, INVALID_ID,
    };
}
