//! The special message vocabulary.
//!
//! Messages whose class is [`MSGBUS_CLASS`] are interpreted by routers and
//! bridges instead of (or in addition to) being forwarded. The method names
//! below are protocol constants; their handling is described on the routing
//! nodes that consume them.

use std::{
    io::{self, Cursor},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use weft_core::{
    error::{Error, Result},
    identifier::Identifier,
    message::{EndpointId, Message, MessageId, VerificationBits},
};

/// Class identifier of all special bus messages.
pub const MSGBUS_CLASS: Identifier = Identifier::new("eagiMsgBus");

const fn msgbus_id(method: &str) -> MessageId {
    MessageId::new(MSGBUS_CLASS, Identifier::new(method))
}

/// Returns true for messages interpreted by routers and bridges.
pub fn is_special(msg_id: MessageId) -> bool {
    msg_id.class == MSGBUS_CLASS
}

/// Request/response ping probe.
pub const PING: MessageId = msgbus_id("ping");
/// Response to [`PING`].
pub const PONG: MessageId = msgbus_id("pong");

/// A new peer requests an endpoint id assignment.
pub const REQUEST_ID: MessageId = msgbus_id("requestId");
/// A router assigns an endpoint id (carried in the target field).
pub const ASSIGN_ID: MessageId = msgbus_id("assignId");
/// A router confirms an adopted id (carried in the target field).
pub const CONFIRM_ID: MessageId = msgbus_id("confirmId");
/// A router-capable peer announces its own id base.
pub const ANNOUNCE_ID: MessageId = msgbus_id("announceId");
/// An endpoint announces its self-assigned id.
pub const ANNOUNCE_ENDPOINT_ID: MessageId = msgbus_id("annEndptId");
/// A peer declares that it is not a router.
pub const NOT_A_ROUTER: MessageId = msgbus_id("notARouter");

/// An endpoint subscribes to a message type.
pub const SUBSCRIBE_TO: MessageId = msgbus_id("subscribTo");
/// An endpoint unsubscribes from a message type.
pub const UNSUBSCRIBE_FROM: MessageId = msgbus_id("unsubFrom");
/// An endpoint reports not being subscribed to a message type.
pub const NOT_SUBSCRIBED_TO: MessageId = msgbus_id("notSubTo");
/// Query which endpoints subscribe to a message type.
pub const QUERY_SUBSCRIBERS: MessageId = msgbus_id("qrySubscrb");
/// Query the subscriptions of an endpoint.
pub const QUERY_SUBSCRIPTIONS: MessageId = msgbus_id("qrySubscrp");
/// Periodic endpoint liveness refresh.
pub const STILL_ALIVE: MessageId = msgbus_id("stillAlive");

/// Add a message id to a link's allow list.
pub const MSG_ALLOW_LIST: MessageId = msgbus_id("msgAlwList");
/// Add a message id to a link's block list.
pub const MSG_BLOCK_LIST: MessageId = msgbus_id("msgBlkList");
/// Clear a link's allow list.
pub const CLEAR_ALLOW_LIST: MessageId = msgbus_id("clrAlwList");
/// Clear a link's block list.
pub const CLEAR_BLOCK_LIST: MessageId = msgbus_id("clrBlkList");

/// One fragment of a blob in transfer.
pub const BLOB_FRAGMENT: MessageId = msgbus_id("blobFrgmnt");
/// Request to resend a missing blob window.
pub const BLOB_RESEND: MessageId = msgbus_id("blobResend");
/// Announcement of an upcoming blob.
pub const BLOB_PREPARE: MessageId = msgbus_id("blobPrpare");

/// Query a router's certificate.
pub const ROUTER_CERT_QUERY: MessageId = msgbus_id("rtrCertQry");
/// Query an endpoint's certificate.
pub const ENDPOINT_CERT_QUERY: MessageId = msgbus_id("eptCertQry");
/// Blob class/method carrying a router certificate in PEM form.
pub const ROUTER_CERT_PEM: MessageId = msgbus_id("rtrCertPem");
/// Blob class/method carrying an endpoint certificate in PEM form.
pub const ENDPOINT_CERT_PEM: MessageId = msgbus_id("eptCertPem");

/// Query the topology of the bus.
pub const TOPOLOGY_QUERY: MessageId = msgbus_id("topoQuery");
/// Topology response describing one router link.
pub const TOPOLOGY_ROUTER_CONN: MessageId = msgbus_id("topoRutrCn");
/// Topology response describing a bridge link.
pub const TOPOLOGY_BRIDGE_CONN: MessageId = msgbus_id("topoBrdgCn");
/// Topology response describing an endpoint.
pub const TOPOLOGY_ENDPOINT: MessageId = msgbus_id("topoEndpt");

/// Query accumulated statistics.
pub const STATS_QUERY: MessageId = msgbus_id("statsQuery");
/// Statistics response of a router.
pub const STATS_ROUTER: MessageId = msgbus_id("statsRutr");
/// Statistics response of a bridge.
pub const STATS_BRIDGE: MessageId = msgbus_id("statsBrdg");
/// Statistics response of an endpoint.
pub const STATS_ENDPOINT: MessageId = msgbus_id("statsEndpt");
/// Statistics response describing one connection.
pub const STATS_CONNECTION: MessageId = msgbus_id("statsConn");

/// Message flow information sent by routers to their nodes.
pub const MSG_FLOW_INFO: MessageId = msgbus_id("msgFlowInf");

/// An endpoint leaves the bus.
pub const BYE_BYE_ENDPOINT: MessageId = msgbus_id("byeByeEndp");
/// A router leaves the bus.
pub const BYE_BYE_ROUTER: MessageId = msgbus_id("byeByeRutr");
/// A bridge leaves the bus.
pub const BYE_BYE_BRIDGE: MessageId = msgbus_id("byeByeBrdg");

/// Request to shut a node down, sent by control endpoints.
pub const SHUTDOWN: MessageId =
    MessageId::new(Identifier::new("Shutdown"), Identifier::new("shutdown"));

/// Verification bits a shutdown request must carry to be honored.
pub const SHUTDOWN_VERIFICATION: VerificationBits = VerificationBits::ALL;

/// A decoded shutdown request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Id of the endpoint that sent the request.
    pub source_id: EndpointId,
    /// Age of the request when it was decoded.
    pub age: Duration,
    /// Which properties of the request were verified.
    pub verified: VerificationBits,
}

impl ShutdownRequest {
    /// Encodes the shutdown payload (the current wall-clock timestamp).
    pub fn encode_now(buffer: &mut Vec<u8>) -> io::Result<()> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        buffer.write_u64::<BigEndian>(now_ms)?;
        Ok(())
    }

    /// Decodes a shutdown request from a message, computing its age from
    /// the embedded timestamp.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut cursor = Cursor::new(message.content());
        let sent_ms = cursor
            .read_u64::<BigEndian>()
            .map_err(|error| Error::Decode(error.to_string()))?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Ok(Self {
            source_id: message.source_id,
            age: Duration::from_millis(now_ms.saturating_sub(sent_ms)),
            verified: message.verification,
        })
    }

    /// Returns true when the request passes the age and verification
    /// policy from the given configuration.
    pub fn is_acceptable(&self, config: &weft_core::config::ShutdownConfig) -> bool {
        if config.ignore {
            return false;
        }
        if self.age > config.max_age {
            return false;
        }
        !config.verify || self.verified.has_all(SHUTDOWN_VERIFICATION)
    }
}
