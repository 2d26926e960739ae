//! Remote entity state.
//!
//! Nodes, instances and hosts refer to each other only by id; the tracker
//! resolves the references. Every mutator records its effect in the
//! entity's change mask.

use std::{collections::HashMap, sync::Arc, time::Duration};

use weft_core::{
    connection::{ConnectionKind, ConnectionStatistics},
    message::{EndpointId, MessageId},
    time::Timeout,
};

use crate::change::{RemoteHostChanges, RemoteInstanceChanges, RemoteNodeChanges};

/// Default ping cadence for remote nodes.
pub const NODE_PING_INTERVAL: Duration = Duration::from_secs(5);
/// Default alive timeout for remote instances.
pub const INSTANCE_ALIVE_TIMEOUT: Duration = Duration::from_secs(180);
/// Default alive timeout for remote hosts.
pub const HOST_ALIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// What role a remote node plays on the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeKind {
    /// The role is not yet known.
    #[default]
    Unknown,
    /// A leaf endpoint.
    Endpoint,
    /// A message router.
    Router,
    /// A stream bridge.
    Bridge,
}

/// Tracked state of one remote bus node.
#[derive(Debug)]
pub struct RemoteNode {
    id: EndpointId,
    kind: NodeKind,
    instance_id: Option<u64>,
    host_id: Option<u64>,
    display_name: Option<Arc<str>>,
    description: Option<Arc<str>>,
    subscriptions: HashMap<MessageId, bool>,
    should_ping: Timeout,
    pings_sent: u64,
    pings_responded: u64,
    pings_timeouted: u64,
    last_ping_time: Duration,
    last_ping_timeout: Duration,
    sent_messages: i64,
    received_messages: i64,
    dropped_messages: i64,
    messages_per_second: i32,
    ping_bits: u8,
    changes: RemoteNodeChanges,
}

impl RemoteNode {
    pub(crate) fn new(id: EndpointId) -> Self {
        Self {
            id,
            kind: NodeKind::Unknown,
            instance_id: None,
            host_id: None,
            display_name: None,
            description: None,
            subscriptions: HashMap::new(),
            should_ping: Timeout::new(NODE_PING_INTERVAL),
            pings_sent: 0,
            pings_responded: 0,
            pings_timeouted: 0,
            last_ping_time: Duration::ZERO,
            last_ping_timeout: Duration::ZERO,
            sent_messages: -1,
            received_messages: -1,
            dropped_messages: -1,
            messages_per_second: -1,
            ping_bits: 0,
            changes: RemoteNodeChanges::empty(),
        }
    }

    /// The node's endpoint id.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The node's role on the bus.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The node's process instance id, when known.
    pub fn instance_id(&self) -> Option<u64> {
        self.instance_id
    }

    /// The id of the host the node runs on, when known.
    pub fn host_id(&self) -> Option<u64> {
        self.host_id
    }

    /// The node's display name, when known.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// The node's description, when known.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the node subscribes to `msg_id`: `Some(true)`/`Some(false)`
    /// when known, `None` when never observed.
    pub fn subscribes_to(&self, msg_id: MessageId) -> Option<bool> {
        self.subscriptions.get(&msg_id).copied()
    }

    /// True when any recent ping got a response.
    pub fn is_responsive(&self) -> bool {
        self.ping_bits != 0
    }

    /// Number of pings sent to this node.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Number of pings this node responded to.
    pub fn pings_responded(&self) -> u64 {
        self.pings_responded
    }

    /// Number of pings that timed out.
    pub fn pings_timeouted(&self) -> u64 {
        self.pings_timeouted
    }

    /// Round-trip time of the most recent ping response.
    pub fn last_ping_time(&self) -> Duration {
        self.last_ping_time
    }

    /// Age of the most recent ping timeout.
    pub fn last_ping_timeout(&self) -> Duration {
        self.last_ping_timeout
    }

    /// Reads and clears the accumulated change mask.
    pub fn drain_changes(&mut self) -> RemoteNodeChanges {
        self.changes.drain()
    }

    /// Adds bits to the change mask directly.
    pub fn add_change(&mut self, change: RemoteNodeChanges) -> &mut Self {
        self.changes |= change;
        self
    }

    /// Resets all tracked state except the node id.
    pub fn clear(&mut self) {
        *self = Self::new(self.id);
    }

    /// Sets the node kind.
    pub fn set_kind(&mut self, kind: NodeKind) -> &mut Self {
        if self.kind != kind {
            self.kind = kind;
            self.changes |= RemoteNodeChanges::KIND;
        }
        self
    }

    /// Sets the process instance id.
    pub fn set_instance_id(&mut self, instance_id: u64) -> &mut Self {
        if self.instance_id != Some(instance_id) {
            self.instance_id = Some(instance_id);
            self.changes |= RemoteNodeChanges::INSTANCE_ID;
        }
        self
    }

    /// Sets the host id.
    pub fn set_host_id(&mut self, host_id: u64) -> &mut Self {
        if self.host_id != Some(host_id) {
            self.host_id = Some(host_id);
            self.changes |= RemoteNodeChanges::HOST_ID;
        }
        self
    }

    /// Sets the display name.
    pub fn set_display_name(&mut self, name: Arc<str>) -> &mut Self {
        self.display_name = Some(name);
        self.changes |= RemoteNodeChanges::ENDPOINT_INFO;
        self
    }

    /// Sets the description.
    pub fn set_description(&mut self, description: Arc<str>) -> &mut Self {
        self.description = Some(description);
        self.changes |= RemoteNodeChanges::ENDPOINT_INFO;
        self
    }

    /// Records that the node subscribes to `msg_id`.
    pub fn add_subscription(&mut self, msg_id: MessageId) -> &mut Self {
        if self.subscriptions.insert(msg_id, true) != Some(true) {
            self.changes |= RemoteNodeChanges::METHODS_ADDED;
        }
        self
    }

    /// Records that the node does not subscribe to `msg_id`.
    pub fn remove_subscription(&mut self, msg_id: MessageId) -> &mut Self {
        if self.subscriptions.insert(msg_id, false) == Some(true) {
            self.changes |= RemoteNodeChanges::METHODS_REMOVED;
        }
        self
    }

    /// Updates traffic statistics reported by the node.
    pub fn set_statistics(
        &mut self,
        sent: i64,
        received: i64,
        dropped: i64,
        messages_per_second: i32,
    ) -> &mut Self {
        self.sent_messages = sent;
        self.received_messages = received;
        self.dropped_messages = dropped;
        self.messages_per_second = messages_per_second;
        self.changes |= RemoteNodeChanges::STATISTICS;
        self
    }

    /// Traffic statistics last reported by the node, as
    /// (sent, received, dropped, messages per second).
    pub fn statistics(&self) -> (i64, i64, i64, i32) {
        (
            self.sent_messages,
            self.received_messages,
            self.dropped_messages,
            self.messages_per_second,
        )
    }

    /// Returns true when a new ping to this node is due, and restarts the
    /// ping interval when it is.
    pub fn should_ping(&mut self) -> bool {
        if self.should_ping.is_expired() {
            self.should_ping.reset();
            self.pings_sent += 1;
            return true;
        }
        false
    }

    /// Records any sign of life from the node.
    pub fn notice_alive(&mut self) -> &mut Self {
        let was_responsive = self.ping_bits != 0;
        self.ping_bits <<= 1;
        self.ping_bits |= 1;
        if !was_responsive {
            self.changes |= RemoteNodeChanges::STARTED_RESPONDING;
        }
        self
    }

    /// Records a ping response with the observed round-trip time.
    pub fn ping_response(&mut self, round_trip: Duration) -> &mut Self {
        let was_responsive = self.ping_bits != 0;
        self.pings_responded += 1;
        self.last_ping_time = round_trip;
        self.ping_bits <<= 1;
        self.ping_bits |= 1;
        if !was_responsive {
            self.changes |= RemoteNodeChanges::STARTED_RESPONDING;
        }
        self.changes |= RemoteNodeChanges::RESPONSE_RATE;
        self
    }

    /// Records a ping timeout with the age of the failed ping.
    pub fn ping_timeout(&mut self, age: Duration) -> &mut Self {
        let was_responsive = self.ping_bits != 0;
        self.pings_timeouted += 1;
        self.last_ping_timeout = age;
        self.ping_bits <<= 1;
        if was_responsive && self.ping_bits == 0 {
            self.changes |= RemoteNodeChanges::STOPPED_RESPONDING;
        }
        self.changes |= RemoteNodeChanges::RESPONSE_RATE;
        self
    }
}

/// Tracked state of one remote process instance.
#[derive(Debug)]
pub struct RemoteInstance {
    id: u64,
    host_id: Option<u64>,
    app_name: Option<Arc<str>>,
    is_alive: Timeout,
    was_alive: bool,
    changes: RemoteInstanceChanges,
}

impl RemoteInstance {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            host_id: None,
            app_name: None,
            is_alive: Timeout::expired(INSTANCE_ALIVE_TIMEOUT),
            was_alive: false,
            changes: RemoteInstanceChanges::empty(),
        }
    }

    /// The instance id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The id of the host this instance runs on, when known.
    pub fn host_id(&self) -> Option<u64> {
        self.host_id
    }

    /// The application name, when known.
    pub fn application_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// True while the instance responded within its alive timeout.
    pub fn is_alive(&self) -> bool {
        !self.is_alive.is_expired()
    }

    /// Reads and clears the accumulated change mask.
    pub fn drain_changes(&mut self) -> RemoteInstanceChanges {
        self.changes.drain()
    }

    /// Records a sign of life.
    pub fn notice_alive(&mut self) -> &mut Self {
        self.is_alive.reset();
        self
    }

    /// Sets the host id.
    pub fn set_host_id(&mut self, host_id: u64) -> &mut Self {
        if self.host_id != Some(host_id) {
            self.host_id = Some(host_id);
            self.changes |= RemoteInstanceChanges::HOST_ID;
        }
        self
    }

    /// Sets the application name.
    pub fn set_application_name(&mut self, name: Arc<str>) -> &mut Self {
        self.app_name = Some(name);
        self.changes |= RemoteInstanceChanges::APPLICATION_INFO;
        self
    }

    /// Flips the responding change bits on alive transitions.
    pub fn update(&mut self) -> &mut Self {
        let alive = !self.is_alive.is_expired();
        if self.was_alive != alive {
            self.was_alive = alive;
            self.changes |= if alive {
                RemoteInstanceChanges::STARTED_RESPONDING
            } else {
                RemoteInstanceChanges::STOPPED_RESPONDING
            };
        }
        self
    }
}

/// Tracked state of one remote host.
#[derive(Debug)]
pub struct RemoteHost {
    id: u64,
    hostname: Option<Arc<str>>,
    cpu_concurrent_threads: i64,
    total_ram_size: i64,
    free_ram_size: i64,
    short_average_load: f32,
    long_average_load: f32,
    is_alive: Timeout,
    was_alive: bool,
    changes: RemoteHostChanges,
}

impl RemoteHost {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            hostname: None,
            cpu_concurrent_threads: -1,
            total_ram_size: -1,
            free_ram_size: -1,
            short_average_load: -1.0,
            long_average_load: -1.0,
            is_alive: Timeout::expired(HOST_ALIVE_TIMEOUT),
            was_alive: false,
            changes: RemoteHostChanges::empty(),
        }
    }

    /// The host id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The host name, when known.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// True while the host responded within its alive timeout.
    pub fn is_alive(&self) -> bool {
        !self.is_alive.is_expired()
    }

    /// Reads and clears the accumulated change mask.
    pub fn drain_changes(&mut self) -> RemoteHostChanges {
        self.changes.drain()
    }

    /// Records a sign of life.
    pub fn notice_alive(&mut self) -> &mut Self {
        self.is_alive.reset();
        self
    }

    /// Sets the host name.
    pub fn set_hostname(&mut self, hostname: Arc<str>) -> &mut Self {
        self.hostname = Some(hostname);
        self.changes |= RemoteHostChanges::HOSTNAME;
        self
    }

    /// Sets the number of concurrent CPU threads.
    pub fn set_cpu_concurrent_threads(&mut self, value: i64) -> &mut Self {
        self.cpu_concurrent_threads = value;
        self.changes |= RemoteHostChanges::HARDWARE_CONFIG;
        self
    }

    /// Sets the total RAM size in bytes.
    pub fn set_total_ram_size(&mut self, value: i64) -> &mut Self {
        self.total_ram_size = value;
        self.changes |= RemoteHostChanges::HARDWARE_CONFIG;
        self
    }

    /// Sets the free RAM size in bytes.
    pub fn set_free_ram_size(&mut self, value: i64) -> &mut Self {
        self.free_ram_size = value;
        self.changes |= RemoteHostChanges::SENSOR_VALUES;
        self
    }

    /// Sets the short-term average load.
    pub fn set_short_average_load(&mut self, value: f32) -> &mut Self {
        self.short_average_load = value;
        self.changes |= RemoteHostChanges::SENSOR_VALUES;
        self
    }

    /// Sets the long-term average load.
    pub fn set_long_average_load(&mut self, value: f32) -> &mut Self {
        self.long_average_load = value;
        self.changes |= RemoteHostChanges::SENSOR_VALUES;
        self
    }

    /// Flips the responding change bits on alive transitions.
    pub fn update(&mut self) -> &mut Self {
        let alive = !self.is_alive.is_expired();
        if self.was_alive != alive {
            self.was_alive = alive;
            self.changes |= if alive {
                RemoteHostChanges::STARTED_RESPONDING
            } else {
                RemoteHostChanges::STOPPED_RESPONDING
            };
        }
        self
    }
}

/// Tracked state of a connection between two nodes, keyed by the
/// unordered id pair.
#[derive(Clone, Copy, Debug)]
pub struct NodeConnection {
    id1: EndpointId,
    id2: EndpointId,
    kind: ConnectionKind,
    block_usage_ratio: f32,
    bytes_per_second: f32,
}

impl NodeConnection {
    pub(crate) fn new(id1: EndpointId, id2: EndpointId) -> Self {
        Self {
            id1,
            id2,
            kind: ConnectionKind::Unknown,
            block_usage_ratio: -1.0,
            bytes_per_second: -1.0,
        }
    }

    /// True when this entry connects the given unordered id pair.
    pub fn connects(&self, id1: EndpointId, id2: EndpointId) -> bool {
        (self.id1 == id1 && self.id2 == id2) || (self.id1 == id2 && self.id2 == id1)
    }

    /// True when this entry touches the given node.
    pub fn connects_node(&self, id: EndpointId) -> bool {
        self.id1 == id || self.id2 == id
    }

    /// The kind of the connection's transport.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: ConnectionKind) -> bool {
        if self.kind != kind {
            self.kind = kind;
            return true;
        }
        false
    }

    /// Buffer usage reported for the connection; negative when unknown.
    pub fn block_usage_ratio(&self) -> f32 {
        self.block_usage_ratio
    }

    /// Transfer rate reported for the connection; negative when unknown.
    pub fn bytes_per_second(&self) -> f32 {
        self.bytes_per_second
    }

    pub(crate) fn assign_statistics(&mut self, stats: &ConnectionStatistics) {
        self.block_usage_ratio = stats.block_usage_ratio;
        self.bytes_per_second = stats.bytes_per_second;
    }
}
