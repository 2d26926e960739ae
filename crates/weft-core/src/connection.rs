//! Connection abstraction for pluggable message transports.

use std::time::Duration;

use crate::{
    identifier::Identifier,
    message::{EndpointId, Message, MessageId},
};

/// The kind of transport backing a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// The transport kind is not known.
    #[default]
    Unknown,
    /// Direct in-process queue pair.
    InProcess,
    /// Local inter-process transport (pipe, unix socket, shared memory).
    LocalIpc,
    /// Remote stream-oriented transport.
    NetworkStream,
    /// Remote datagram-oriented transport.
    NetworkDatagram,
}

impl ConnectionKind {
    /// Encodes the kind as a single byte for wire payloads.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionKind::Unknown => 0,
            ConnectionKind::InProcess => 1,
            ConnectionKind::LocalIpc => 2,
            ConnectionKind::NetworkStream => 3,
            ConnectionKind::NetworkDatagram => 4,
        }
    }

    /// Decodes a kind byte; unknown values map to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionKind::InProcess,
            2 => ConnectionKind::LocalIpc,
            3 => ConnectionKind::NetworkStream,
            4 => ConnectionKind::NetworkDatagram,
            _ => ConnectionKind::Unknown,
        }
    }
}

/// Transfer statistics reported by a connection.
///
/// Negative values mean the connection does not track the quantity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectionStatistics {
    /// Id of the node on this side of the connection.
    pub local_id: EndpointId,
    /// Id of the node on the other side of the connection.
    pub remote_id: EndpointId,
    /// Ratio of the connection's buffer capacity currently in use.
    pub block_usage_ratio: f32,
    /// Recent transfer rate in bytes per second.
    pub bytes_per_second: f32,
}

impl Default for ConnectionStatistics {
    fn default() -> Self {
        Self {
            local_id: crate::message::INVALID_ID,
            remote_id: crate::message::INVALID_ID,
            block_usage_ratio: -1.0,
            bytes_per_second: -1.0,
        }
    }
}

/// Handler invoked for each fetched message.
///
/// Receives the message id, the age the transport measured for the message
/// while queued, and the message itself. Returning `false` tells the
/// connection the message was not consumed.
pub type FetchHandler<'a> = &'a mut dyn FnMut(MessageId, Duration, &Message) -> bool;

/// A full-duplex message channel between two bus nodes.
///
/// Implementations are polled: `update` makes transport progress, `send`
/// enqueues a single message and `fetch_messages` drains everything
/// received so far through a handler. All operations report success or
/// progress as booleans; transient failures are expected and handled by
/// the caller's statistics and cleanup sweeps.
pub trait Connection: Send {
    /// The transport kind of this connection.
    fn kind(&self) -> ConnectionKind;

    /// An identifier tag naming the concrete connection type.
    fn type_id(&self) -> Identifier;

    /// Largest single-message payload this connection can carry.
    fn max_data_size(&self) -> Option<usize> {
        None
    }

    /// Returns true while the connection can be used for communication.
    fn is_usable(&self) -> bool {
        true
    }

    /// Enqueues a single message; returns false when the message was not
    /// accepted.
    fn send(&mut self, msg_id: MessageId, message: &Message) -> bool;

    /// Drains received messages through `handler`; returns true when at
    /// least one message was fetched.
    fn fetch_messages(&mut self, handler: FetchHandler) -> bool;

    /// Makes transport progress; returns true when any work was done.
    fn update(&mut self) -> bool {
        false
    }

    /// Fills in transfer statistics; returns false when not supported.
    fn query_statistics(&self, _stats: &mut ConnectionStatistics) -> bool {
        false
    }

    /// Releases transport resources before the connection is dropped.
    fn cleanup(&mut self) {}
}

/// Produces new connections on behalf of a listening node.
pub trait Acceptor: Send {
    /// The transport kind of accepted connections.
    fn kind(&self) -> ConnectionKind;

    /// An identifier tag naming the concrete acceptor type.
    fn type_id(&self) -> Identifier;

    /// Makes accept progress; returns true when any work was done.
    fn update(&mut self) -> bool;

    /// Hands every newly accepted connection to `handler`; returns true
    /// when at least one connection was accepted.
    fn process_accepted(&mut self, handler: &mut dyn FnMut(Box<dyn Connection>)) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_kind_codec() {
        for kind in [
            ConnectionKind::Unknown,
            ConnectionKind::InProcess,
            ConnectionKind::LocalIpc,
            ConnectionKind::NetworkStream,
            ConnectionKind::NetworkDatagram,
        ] {
            assert_eq!(ConnectionKind::from_u8(kind.to_u8()), kind);
        }
        assert_eq!(ConnectionKind::from_u8(99), ConnectionKind::Unknown);
    }

    #[test]
    fn test_connection_statistics_defaults() {
        let stats = ConnectionStatistics::default();
        assert!(stats.block_usage_ratio < 0.0);
        assert!(stats.bytes_per_second < 0.0);
    }
}
