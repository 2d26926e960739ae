//! Accepted connections awaiting id negotiation.

use std::time::{Duration, Instant};

use weft_core::connection::Connection;

/// A newly accepted connection not yet associated with an endpoint id.
///
/// The router probes pending connections for id-negotiation messages and
/// either adopts them as routed nodes or drops them once the pending
/// timeout expires.
pub struct PendingConnection {
    /// The accepted connection.
    pub connection: Box<dyn Connection>,
    created: Instant,
}

impl PendingConnection {
    /// Wraps a freshly accepted connection.
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self { connection, created: Instant::now() }
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}
