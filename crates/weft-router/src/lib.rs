#![warn(missing_docs)]

//! weft-router: the message forwarding engine.
//!
//! A router owns a set of connections to endpoints and downstream routers,
//! plus an optional uplink to a parent router. Its owning thread drives
//! `update` in a loop; each cycle performs maintenance (statistics, blob
//! engine, timeout sweeps) and then units of work: accepting connections,
//! advancing pending adoptions, routing fetched messages and updating every
//! link. Connection updates fan out to worker threads once the router hosts
//! more than two nodes.

/// Certificate store shared by the router's verification hooks.
pub mod context;
/// Per-endpoint subscription and liveness cache.
pub mod endpoint_info;
/// A routed node: one adopted connection with its message filters.
pub mod node;
/// The uplink to a parent router.
pub mod parent;
/// Accepted connections awaiting id negotiation.
pub mod pending;
/// The router itself.
pub mod router;
/// Router statistics accumulation and rate windows.
pub mod stats;
/// Parallel connection update fan-out.
pub mod workers;

pub use context::RouterContext;
pub use router::Router;
