//! Routed node state.

use std::time::Duration;

use tracing::debug;

use weft_blob::BlobEngine;
use weft_core::{
    connection::{Connection, ConnectionKind, ConnectionStatistics},
    message::{EndpointId, Message, MessageId},
};
use weft_protocol::special;

pub(crate) fn message_id_list_contains(list: &[MessageId], entry: MessageId) -> bool {
    list.contains(&entry)
}

pub(crate) fn message_id_list_add(list: &mut Vec<MessageId>, entry: MessageId) {
    if !message_id_list_contains(list, entry) {
        list.push(entry);
    }
}

pub(crate) fn message_id_list_remove(list: &mut Vec<MessageId>, entry: MessageId) {
    list.retain(|id| *id != entry);
}

/// One adopted connection of a router.
///
/// Holds the connection itself, the router-capability hint used by the
/// multi-router fallback, the disconnect latch set by bye-bye messages and
/// the per-link allow/block message filters.
pub struct RoutedNode {
    connection: Option<Box<dyn Connection>>,
    maybe_router: bool,
    do_disconnect: bool,
    allow_list: Vec<MessageId>,
    block_list: Vec<MessageId>,
}

impl Default for RoutedNode {
    fn default() -> Self {
        Self {
            connection: None,
            maybe_router: true,
            do_disconnect: false,
            allow_list: Vec::with_capacity(8),
            block_list: Vec::with_capacity(8),
        }
    }
}

impl RoutedNode {
    /// Installs the connection and the router-capability hint.
    pub fn setup(&mut self, connection: Box<dyn Connection>, maybe_router: bool) {
        self.connection = Some(connection);
        self.maybe_router = maybe_router;
        self.do_disconnect = false;
    }

    /// Returns true when `msg_id` passes this link's filters.
    ///
    /// Special messages always pass. A non-empty allow list admits only its
    /// entries; otherwise a non-empty block list rejects its entries.
    pub fn is_allowed(&self, msg_id: MessageId) -> bool {
        if special::is_special(msg_id) {
            return true;
        }
        if !self.allow_list.is_empty() {
            return message_id_list_contains(&self.allow_list, msg_id);
        }
        if !self.block_list.is_empty() {
            return !message_id_list_contains(&self.block_list, msg_id);
        }
        true
    }

    /// Clears the router-capability hint.
    pub fn mark_not_a_router(&mut self) {
        self.maybe_router = false;
    }

    /// Returns the router-capability hint.
    pub fn maybe_router(&self) -> bool {
        self.maybe_router
    }

    /// Latches the disconnect flag unless the peer may be a router.
    pub fn handle_bye_bye(&mut self) {
        if !self.maybe_router {
            self.do_disconnect = true;
        }
    }

    /// True when the link should be cleaned up.
    pub fn should_disconnect(&self) -> bool {
        match &self.connection {
            Some(connection) => self.do_disconnect || !connection.is_usable(),
            None => true,
        }
    }

    /// Cleans up and drops the connection.
    pub fn cleanup_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.cleanup();
            self.do_disconnect = false;
        }
    }

    /// The transport kind of this link.
    pub fn kind_of_connection(&self) -> ConnectionKind {
        match &self.connection {
            Some(connection) => connection.kind(),
            None => ConnectionKind::Unknown,
        }
    }

    /// Fills in transfer statistics of this link.
    pub fn query_statistics(&self, stats: &mut ConnectionStatistics) -> bool {
        match &self.connection {
            Some(connection) => connection.query_statistics(stats),
            None => false,
        }
    }

    /// Sends a message on this link; returns false on failure.
    pub fn send(&mut self, msg_id: MessageId, message: &Message) -> bool {
        match &mut self.connection {
            Some(connection) => {
                if !connection.send(msg_id, message) {
                    debug!("failed to send message to connected node");
                    return false;
                }
                true
            }
            None => {
                debug!("missing or unusable node connection");
                false
            }
        }
    }

    /// Offers a message to this link when the peer may be a router.
    pub fn try_route(&mut self, msg_id: MessageId, message: &Message) -> bool {
        if self.maybe_router {
            return self.send(msg_id, message);
        }
        false
    }

    /// Drains received messages into `batch`; returns true when any
    /// message was fetched.
    pub fn fetch_into(&mut self, batch: &mut Vec<(MessageId, Duration, Message)>) -> bool {
        match &mut self.connection {
            Some(connection) => connection.fetch_messages(&mut |msg_id, age, message| {
                batch.push((msg_id, age, message.clone()));
                true
            }),
            None => false,
        }
    }

    /// Makes transport progress on this link.
    pub fn update_connection(&mut self) -> bool {
        match &mut self.connection {
            Some(connection) => connection.update(),
            None => false,
        }
    }

    /// Gives the blob engine a send opportunity on this link.
    ///
    /// Only fragments addressed to this node's endpoint are sent here.
    pub fn process_blobs(&mut self, node_id: EndpointId, blobs: &mut BlobEngine) -> bool {
        let Some(connection) = &mut self.connection else {
            return false;
        };
        if !connection.is_usable() {
            return false;
        }
        let Some(max_data_size) = connection.max_data_size() else {
            return false;
        };
        blobs.process_outgoing(
            &mut |msg_id, message| {
                if message.target_id == node_id {
                    return connection.send(msg_id, message);
                }
                false
            },
            max_data_size,
            4,
        )
    }

    /// Adds a message id to the block list; specials cannot be blocked.
    pub fn block_message(&mut self, msg_id: MessageId) {
        message_id_list_add(&mut self.block_list, msg_id);
    }

    /// Adds a message id to the allow list.
    pub fn allow_message(&mut self, msg_id: MessageId) {
        message_id_list_add(&mut self.allow_list, msg_id);
    }

    /// Clears the block list.
    pub fn clear_block_list(&mut self) {
        self.block_list.clear();
    }

    /// Clears the allow list.
    pub fn clear_allow_list(&mut self) {
        self.allow_list.clear();
    }
}
