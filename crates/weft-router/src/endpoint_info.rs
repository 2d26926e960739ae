//! Per-endpoint subscription and liveness cache.

use std::time::Duration;

use weft_core::{
    message::{Message, MessageId},
    time::Timeout,
};

use crate::node::{message_id_list_add, message_id_list_contains, message_id_list_remove};

/// Cached information about one endpoint reachable through this router.
///
/// Refreshed by subscription and still-alive traffic; entries whose
/// outdatedness timeout expires are evicted by the maintenance sweep.
pub struct RouterEndpointInfo {
    /// The endpoint's process instance id, carried in the sequence field
    /// of subscription messages. A changed instance resets the cache.
    pub instance_id: u64,
    /// Message types the endpoint subscribes to.
    pub subscriptions: Vec<MessageId>,
    /// Message types the endpoint reported not subscribing to.
    pub unsubscriptions: Vec<MessageId>,
    is_outdated: Timeout,
}

impl RouterEndpointInfo {
    /// Creates an empty cache entry with the given idle timeout.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            instance_id: 0,
            subscriptions: Vec::new(),
            unsubscriptions: Vec::new(),
            is_outdated: Timeout::new(idle_timeout),
        }
    }

    /// Refreshes the entry from a message, resetting the subscription
    /// lists when the endpoint's instance id changed.
    pub fn assign_instance_id(&mut self, message: &Message) {
        self.is_outdated.reset();
        if self.instance_id != message.sequence_no {
            self.instance_id = message.sequence_no;
            self.subscriptions.clear();
            self.unsubscriptions.clear();
        }
    }

    /// True once the endpoint went silent past its idle timeout.
    pub fn is_outdated(&self) -> bool {
        self.is_outdated.is_expired()
    }

    /// Records a subscription.
    pub fn add_subscription(&mut self, msg_id: MessageId) {
        message_id_list_add(&mut self.subscriptions, msg_id);
        message_id_list_remove(&mut self.unsubscriptions, msg_id);
    }

    /// Records an unsubscription.
    pub fn remove_subscription(&mut self, msg_id: MessageId) {
        message_id_list_remove(&mut self.subscriptions, msg_id);
        message_id_list_add(&mut self.unsubscriptions, msg_id);
    }

    /// True when the endpoint is known to subscribe to `msg_id`.
    pub fn subscribes_to(&self, msg_id: MessageId) -> bool {
        message_id_list_contains(&self.subscriptions, msg_id)
    }

    /// True when the endpoint is known not to subscribe to `msg_id`.
    pub fn not_subscribed_to(&self, msg_id: MessageId) -> bool {
        message_id_list_contains(&self.unsubscriptions, msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::identifier::Identifier;

    fn topic(method: &str) -> MessageId {
        MessageId::new(Identifier::new("eagiTest"), Identifier::new(method))
    }

    #[test]
    fn test_subscription_lists_are_exclusive() {
        let mut info = RouterEndpointInfo::new(Duration::from_secs(30));
        let msg_id = topic("values");

        info.add_subscription(msg_id);
        assert!(info.subscribes_to(msg_id));
        assert!(!info.not_subscribed_to(msg_id));

        info.remove_subscription(msg_id);
        assert!(!info.subscribes_to(msg_id));
        assert!(info.not_subscribed_to(msg_id));
    }

    #[test]
    fn test_instance_change_resets_subscriptions() {
        let mut info = RouterEndpointInfo::new(Duration::from_secs(30));
        info.add_subscription(topic("values"));

        let mut message = Message::new();
        message.set_sequence_no(1);
        info.assign_instance_id(&message);
        assert_eq!(info.instance_id, 1);
        // First assignment replaces instance id 0 and clears the lists
        assert!(!info.subscribes_to(topic("values")));

        info.add_subscription(topic("values"));
        info.assign_instance_id(&message);
        // Same instance: subscriptions survive
        assert!(info.subscribes_to(topic("values")));

        message.set_sequence_no(2);
        info.assign_instance_id(&message);
        assert!(!info.subscribes_to(topic("values")));
    }

    #[test]
    fn test_outdatedness() {
        let info = RouterEndpointInfo::new(Duration::ZERO);
        assert!(info.is_outdated());

        let mut refreshed = RouterEndpointInfo::new(Duration::from_secs(60));
        refreshed.assign_instance_id(&Message::new());
        assert!(!refreshed.is_outdated());
    }
}
