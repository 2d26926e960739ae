//! The uplink to a parent router.

use std::time::Duration;

use tracing::debug;

use weft_core::{
    connection::{Connection, ConnectionKind, ConnectionStatistics},
    message::{EndpointId, Message, MessageId, INVALID_ID},
    time::Timeout,
};
use weft_protocol::special;

const CONFIRM_ID_PERIOD: Duration = Duration::from_secs(2);

/// The router's connection toward its parent router, when configured.
///
/// The child announces its id base to the parent and re-announces until
/// the parent confirms it; losing the connection resets the confirmation.
pub struct ParentRouter {
    connection: Option<Box<dyn Connection>>,
    confirmed_id: EndpointId,
    remote_id: EndpointId,
    confirm_id_timeout: Timeout,
}

impl Default for ParentRouter {
    fn default() -> Self {
        Self {
            connection: None,
            confirmed_id: INVALID_ID,
            remote_id: INVALID_ID,
            confirm_id_timeout: Timeout::expired(CONFIRM_ID_PERIOD),
        }
    }
}

impl ParentRouter {
    /// Installs (or replaces) the parent connection.
    pub fn reset(&mut self, connection: Box<dyn Connection>) {
        self.connection = Some(connection);
        self.confirmed_id = INVALID_ID;
        self.remote_id = INVALID_ID;
    }

    /// True when a parent connection is configured.
    pub fn is_configured(&self) -> bool {
        self.connection.is_some()
    }

    /// The id the parent confirmed for this router, or [`INVALID_ID`].
    pub fn id(&self) -> EndpointId {
        self.confirmed_id
    }

    /// The parent router's own id, learned from the confirmation.
    pub fn remote_id(&self) -> EndpointId {
        self.remote_id
    }

    /// Records the id confirmed by the parent.
    pub fn confirm_id(&mut self, message: &Message) {
        self.confirmed_id = message.target_id;
        self.remote_id = message.source_id;
        debug!(
            id = message.target_id,
            source = message.source_id,
            "confirmed id by parent router",
        );
    }

    /// Logs a bye-bye received from beyond the parent.
    pub fn handle_bye(&self, msg_id: MessageId, message: &Message) {
        debug!(
            method = %msg_id.method,
            source = message.source_id,
            "received bye-bye from node behind parent router",
        );
    }

    fn announce_id(&mut self, id_base: EndpointId) {
        if let Some(connection) = &mut self.connection {
            let mut announcement = Message::new();
            announcement.set_source_id(id_base);
            connection.send(special::ANNOUNCE_ID, &announcement);
            self.confirm_id_timeout.reset();
            debug!(id = id_base, "announcing id to parent router");
        }
    }

    /// The transport kind of the parent link.
    pub fn kind_of_connection(&self) -> ConnectionKind {
        match &self.connection {
            Some(connection) => connection.kind(),
            None => ConnectionKind::Unknown,
        }
    }

    /// Fills in transfer statistics of the parent link.
    pub fn query_statistics(&self, stats: &mut ConnectionStatistics) -> bool {
        match &self.connection {
            Some(connection) => connection.query_statistics(stats),
            None => false,
        }
    }

    /// Makes transport progress and keeps the id announcement alive.
    pub fn update(&mut self, id_base: EndpointId) -> bool {
        let (updated, usable) = match &mut self.connection {
            Some(connection) => (connection.update(), connection.is_usable()),
            None => return false,
        };
        let mut something_done = updated;
        if usable {
            if self.confirmed_id == INVALID_ID && self.confirm_id_timeout.is_expired() {
                self.announce_id(id_base);
                if let Some(connection) = &mut self.connection {
                    connection.update();
                }
                something_done = true;
            }
        } else if self.confirmed_id != INVALID_ID {
            self.confirmed_id = INVALID_ID;
            something_done = true;
            debug!("lost connection to parent router");
        }
        something_done
    }

    /// Sends a message toward the parent; returns false on failure.
    pub fn send(&mut self, msg_id: MessageId, message: &Message) -> bool {
        match &mut self.connection {
            Some(connection) => {
                if !connection.send(msg_id, message) {
                    debug!("failed to send message to parent router");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Drains messages received from the parent into `batch`.
    pub fn fetch_into(&mut self, batch: &mut Vec<(MessageId, Duration, Message)>) -> bool {
        match &mut self.connection {
            Some(connection) => connection.fetch_messages(&mut |msg_id, age, message| {
                batch.push((msg_id, age, message.clone()));
                true
            }),
            None => false,
        }
    }
}
