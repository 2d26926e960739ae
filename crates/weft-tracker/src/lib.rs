#![warn(missing_docs)]

//! weft-tracker: state model of remote bus participants.
//!
//! A tracker instance observes the traffic of one bus node and maintains
//! the known state of remote nodes, their process instances, the hosts
//! they run on and the connections between them. Every entity carries a
//! change mask that mutations accumulate into; consumers drain the mask
//! to learn what happened since they last looked, which avoids callback
//! reentrancy in the cyclic node/instance/host graph.

/// Change masks accumulated on tracker entities.
pub mod change;
/// Remote node, instance, host and connection state.
pub mod node;
/// The tracker owning the entity maps and string cache.
pub mod tracker;

pub use change::{RemoteHostChanges, RemoteInstanceChanges, RemoteNodeChanges};
pub use node::{NodeConnection, NodeKind, RemoteHost, RemoteInstance, RemoteNode};
pub use tracker::RemoteNodeTracker;
