//! The router core.
//!
//! Implements endpoint-id allocation and confirmation, pending-connection
//! adoption, targeted and broadcast forwarding with per-link filtering,
//! the special-message protocol and the maintenance/work scheduling
//! described on the crate root.

use std::{
    collections::HashMap,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info, trace, warn};

use weft_blob::{BlobEngine, BufferSource, BufferTarget, TargetBlobIo};
use weft_core::{
    config::{BlobConfig, RouterConfig},
    connection::{Acceptor, Connection, ConnectionStatistics},
    message::{EndpointId, Message, MessageId, Priority, BROADCAST_ID, INVALID_ID},
    time::Timeout,
};
use weft_protocol::{
    payload::{self, RouterTopologyInfo},
    special::{self, ShutdownRequest},
};

use crate::{
    context::RouterContext,
    endpoint_info::RouterEndpointInfo,
    node::RoutedNode,
    parent::ParentRouter,
    pending::PendingConnection,
    stats::RouterStats,
    workers,
};

/// Max time certificate blobs are given to reach their target.
const CERT_BLOB_MAX_TIME: Duration = Duration::from_secs(30);

enum Handling {
    Handled,
    Forward,
}

#[derive(Clone, Copy)]
enum Probe {
    Nothing,
    RequestId,
    Endpoint(EndpointId),
    Router(EndpointId),
}

/// A message bus router.
///
/// Owns its routed nodes, the pending-connection list, the blob engine
/// and the endpoint-info index; one thread drives [`Router::update`] in a
/// loop. Cross-thread work happens only in the parallel connection update
/// fan-out, which hands workers pre-sliced disjoint node chunks.
pub struct Router {
    config: RouterConfig,
    context: RouterContext,
    id_base: EndpointId,
    id_end: EndpointId,
    id_sequence: EndpointId,
    instance_id: u64,
    acceptors: Vec<Box<dyn Acceptor>>,
    pending: Vec<PendingConnection>,
    nodes: HashMap<EndpointId, RoutedNode>,
    parent: ParentRouter,
    endpoint_idx: HashMap<EndpointId, EndpointId>,
    endpoint_infos: HashMap<EndpointId, RouterEndpointInfo>,
    recently_disconnected: HashMap<EndpointId, Timeout>,
    blobs: BlobEngine,
    stats: RouterStats,
    no_connection_timeout: Timeout,
    shutdown_delay: Timeout,
    do_shutdown: bool,
    prev_route_time: Instant,
    use_workers: bool,
    worker_count: usize,
}

impl Router {
    /// Creates a router with the given configuration.
    pub fn new(config: RouterConfig) -> Self {
        let host_id = u64::from(std::process::id());
        let id_base = config
            .id_major
            .unwrap_or(host_id << 32)
            .wrapping_add(config.id_minor);
        let (id_base, id_end) = if id_base != 0 {
            (id_base, id_base.saturating_add(config.id_count))
        } else {
            (1, config.id_count)
        };
        info!(
            base = id_base,
            end = id_end,
            count = config.id_count,
            "using router id range",
        );

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);
        let instance_id = (host_id << 32) | nanos;

        let worker_count = config.workers.unwrap_or_else(num_cpus::get).max(1);
        let no_connection_timeout = Timeout::new(config.no_connection_timeout);
        let shutdown_delay = Timeout::new(config.shutdown.delay);
        let stats = RouterStats::new(config.stats_window);

        Self {
            config,
            context: RouterContext::new(),
            id_base,
            id_end,
            id_sequence: id_base + 1,
            instance_id,
            acceptors: Vec::new(),
            pending: Vec::new(),
            nodes: HashMap::new(),
            parent: ParentRouter::default(),
            endpoint_idx: HashMap::new(),
            endpoint_infos: HashMap::new(),
            recently_disconnected: HashMap::new(),
            blobs: BlobEngine::for_bus(BlobConfig::default()),
            stats,
            no_connection_timeout,
            shutdown_delay,
            do_shutdown: false,
            prev_route_time: Instant::now(),
            use_workers: false,
            worker_count,
        }
    }

    /// The first id of this router's reserved endpoint-id range; also the
    /// id the router itself answers on.
    pub fn id_base(&self) -> EndpointId {
        self.id_base
    }

    /// This router's process instance id.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Number of currently adopted nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total messages forwarded on node links.
    pub fn forwarded_messages(&self) -> i64 {
        self.stats.forwarded()
    }

    /// Total messages dropped.
    pub fn dropped_messages(&self) -> i64 {
        self.stats.dropped()
    }

    /// Installs this router's own certificate.
    pub fn add_certificate_pem(&mut self, pem: &[u8]) {
        self.context.add_own_certificate_pem(pem);
    }

    /// Installs the certificate authority's certificate.
    pub fn add_ca_certificate_pem(&mut self, pem: &[u8]) {
        self.context.add_ca_certificate_pem(pem);
    }

    /// Adds a connection acceptor.
    pub fn add_acceptor(&mut self, acceptor: Box<dyn Acceptor>) {
        info!(kind = ?acceptor.kind(), r#type = %acceptor.type_id(), "adding connection acceptor");
        self.acceptors.push(acceptor);
    }

    /// Assigns the connection to the parent router.
    pub fn add_connection(&mut self, connection: Box<dyn Connection>) {
        info!(
            kind = ?connection.kind(),
            r#type = %connection.type_id(),
            "assigning parent router connection",
        );
        self.parent.reset(connection);
    }

    /// Enqueues a blob transfer toward `target_id` through this router.
    #[allow(clippy::too_many_arguments)]
    pub fn post_blob(
        &mut self,
        msg_id: MessageId,
        source_id: EndpointId,
        target_id: EndpointId,
        target_blob_id: u64,
        content: &[u8],
        max_time: Duration,
        priority: Priority,
    ) {
        self.blobs.push_outgoing(
            msg_id,
            source_id,
            target_id,
            target_blob_id,
            Box::new(BufferSource::new(content.to_vec())),
            max_time,
            priority,
        );
    }

    /// True once an accepted shutdown request's delay elapsed.
    pub fn is_shut_down(&self) -> bool {
        self.do_shutdown && self.shutdown_delay.is_expired()
    }

    /// True when the owning loop should exit: shutdown was accepted or
    /// the router had no connection for too long.
    pub fn is_done(&self) -> bool {
        self.is_shut_down() || self.no_connection_timeout.is_expired()
    }

    // ------------------------------------------------------------------
    // id allocation
    // ------------------------------------------------------------------

    fn next_free_id(&mut self) -> Option<EndpointId> {
        let seq_orig = self.id_sequence;
        while self.nodes.contains_key(&self.id_sequence) {
            self.id_sequence += 1;
            if self.id_sequence >= self.id_end {
                self.id_sequence = self.id_base + 1;
            }
            if self.id_sequence == seq_orig {
                // The whole range is occupied; defer the assignment
                return None;
            }
        }
        let id = self.id_sequence;
        self.id_sequence += 1;
        if self.id_sequence >= self.id_end {
            self.id_sequence = self.id_base + 1;
        }
        Some(id)
    }

    // ------------------------------------------------------------------
    // accept & adoption
    // ------------------------------------------------------------------

    fn handle_accept(&mut self) -> bool {
        let mut something_done = false;
        let mut accepted: Vec<Box<dyn Connection>> = Vec::new();
        for acceptor in &mut self.acceptors {
            something_done |= acceptor.update();
            something_done |= acceptor.process_accepted(&mut |connection| {
                accepted.push(connection);
            });
        }
        for connection in accepted {
            info!(
                kind = ?connection.kind(),
                r#type = %connection.type_id(),
                "accepted pending connection",
            );
            self.pending.push(PendingConnection::new(connection));
            something_done = true;
        }
        something_done
    }

    fn handle_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let mut something_done = false;
        let mut index = 0;
        while index < self.pending.len() {
            let mut probe = Probe::Nothing;
            {
                let pending = &mut self.pending[index];
                something_done |= pending.connection.update();
                something_done |= pending.connection.fetch_messages(&mut |msg_id, _age, msg| {
                    match msg_id {
                        special::REQUEST_ID => {
                            probe = Probe::RequestId;
                            true
                        }
                        special::ANNOUNCE_ENDPOINT_ID => {
                            probe = Probe::Endpoint(msg.source_id);
                            true
                        }
                        special::ANNOUNCE_ID => {
                            probe = Probe::Router(msg.source_id);
                            true
                        }
                        _ => false,
                    }
                });
                something_done |= pending.connection.update();
            }
            match probe {
                Probe::RequestId => {
                    if let Some(id) = self.next_free_id() {
                        debug!(id, "assigning id to accepted connection");
                        let mut message = Message::new();
                        message.set_target_id(id);
                        self.pending[index].connection.send(special::ASSIGN_ID, &message);
                        something_done = true;
                    }
                    index += 1;
                }
                Probe::Endpoint(id) | Probe::Router(id) if id != INVALID_ID => {
                    let maybe_router = matches!(probe, Probe::Router(_));
                    let mut pending = self.pending.remove(index);
                    info!(
                        id,
                        kind = ?pending.connection.kind(),
                        counterpart = if maybe_router { "non-endpoint" } else { "endpoint" },
                        "adopting pending connection",
                    );

                    let mut confirmation = Message::new();
                    confirmation.set_source_id(self.id_base).set_target_id(id);
                    pending.connection.send(special::CONFIRM_ID, &confirmation);

                    let node = self.nodes.entry(id).or_default();
                    node.setup(pending.connection, maybe_router);
                    self.recently_disconnected.remove(&id);
                    self.update_use_workers();
                    something_done = true;
                }
                _ => {
                    index += 1;
                }
            }
        }
        something_done
    }

    // ------------------------------------------------------------------
    // maintenance
    // ------------------------------------------------------------------

    fn is_recently_disconnected(&self, endpoint_id: EndpointId) -> bool {
        match self.recently_disconnected.get(&endpoint_id) {
            Some(timeout) => !timeout.is_expired(),
            None => false,
        }
    }

    fn mark_disconnected(&mut self, endpoint_id: EndpointId) {
        self.recently_disconnected.retain(|_, timeout| !timeout.is_expired());
        self.recently_disconnected
            .insert(endpoint_id, Timeout::new(self.config.recently_disconnected_ttl));
    }

    fn remove_timeouted(&mut self) -> bool {
        let mut something_done = false;

        let pending_timeout = self.config.pending_timeout;
        self.pending.retain(|pending| {
            if pending.age() > pending_timeout {
                warn!(
                    age_ms = pending.age().as_millis() as u64,
                    "removing timeouted pending connection",
                );
                something_done = true;
                false
            } else {
                true
            }
        });

        let outdated: Vec<EndpointId> = self
            .endpoint_infos
            .iter()
            .filter(|(_, info)| info.is_outdated())
            .map(|(&endpoint_id, _)| endpoint_id)
            .collect();
        for endpoint_id in outdated {
            self.endpoint_infos.remove(&endpoint_id);
            self.endpoint_idx.remove(&endpoint_id);
            self.mark_disconnected(endpoint_id);
        }

        something_done
    }

    fn remove_disconnected(&mut self) -> bool {
        let mut something_done = false;
        for node in self.nodes.values_mut() {
            if node.should_disconnect() {
                debug!("removing disconnected connection");
                node.cleanup_connection();
            }
        }
        let disconnected: Vec<EndpointId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.should_disconnect())
            .map(|(&node_id, _)| node_id)
            .collect();
        for node_id in disconnected {
            self.nodes.remove(&node_id);
            self.mark_disconnected(node_id);
            something_done = true;
        }
        if something_done {
            self.update_use_workers();
        }
        something_done
    }

    fn update_use_workers(&mut self) {
        self.use_workers = self.nodes.len() > 2;
    }

    fn update_stats(&mut self) -> bool {
        let mut something_done = false;
        if let Some(flow_info) = self.stats.update_window() {
            let mut flow_payload = Vec::new();
            if flow_info.encode(&mut flow_payload).is_ok() {
                for (&node_id, node) in self.nodes.iter_mut() {
                    let mut message = Message::with_payload(flow_payload.clone());
                    message.set_source_id(self.id_base);
                    message.set_target_id(node_id);
                    message.set_priority(Priority::High);
                    node.send(special::MSG_FLOW_INFO, &message);
                    something_done = true;
                }
            }
        }
        something_done
    }

    fn process_blobs(&mut self) -> bool {
        let mut something_done = self.blobs.handle_complete() > 0;

        let mut finished: Vec<(MessageId, Message)> = Vec::new();
        self.blobs.fetch_all(&mut |msg_id, message| {
            finished.push((msg_id, message.clone()));
            true
        });
        for (msg_id, message) in finished {
            self.handle_blob(msg_id, &message);
        }

        let mut resend_requests: Vec<(MessageId, Message)> = Vec::new();
        something_done |= self.blobs.update(&mut |msg_id, message| {
            resend_requests.push((msg_id, message.clone()));
            true
        });
        for (msg_id, mut message) in resend_requests {
            message.set_source_id(self.id_base);
            self.route_message(msg_id, self.id_base, &mut message);
        }

        if self.blobs.has_outgoing() {
            for (&node_id, node) in self.nodes.iter_mut() {
                something_done |= node.process_blobs(node_id, &mut self.blobs);
            }
        }
        something_done
    }

    /// Performs one maintenance pass: statistics, blob engine, timeout
    /// sweeps and disconnected-node collection.
    pub fn do_maintenance(&mut self) -> bool {
        let mut something_done = false;
        something_done |= self.update_stats();
        something_done |= self.process_blobs();
        something_done |= self.remove_timeouted();
        something_done |= self.remove_disconnected();
        something_done
    }

    // ------------------------------------------------------------------
    // routing
    // ------------------------------------------------------------------

    fn route_all(&mut self) -> bool {
        let now = Instant::now();
        let age_inc = now - self.prev_route_time;
        self.prev_route_time = now;

        let mut something_done = false;
        let mut batch: Vec<(MessageId, Duration, Message)> = Vec::new();

        let node_ids: Vec<EndpointId> = self.nodes.keys().copied().collect();
        for node_id in node_ids {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                something_done |= node.fetch_into(&mut batch);
            }
            for (msg_id, msg_age, message) in batch.drain(..) {
                self.handle_node_message(node_id, age_inc, msg_id, msg_age, message);
            }
        }

        something_done |= self.parent.fetch_into(&mut batch);
        for (msg_id, msg_age, message) in batch.drain(..) {
            self.handle_parent_message(age_inc, msg_id, msg_age, message);
        }

        something_done
    }

    fn handle_node_message(
        &mut self,
        incoming_id: EndpointId,
        age_inc: Duration,
        msg_id: MessageId,
        msg_age: Duration,
        mut message: Message,
    ) {
        message.add_age(msg_age).add_age(age_inc);
        self.stats.add_age_sample(message.age);

        if special::is_special(msg_id) {
            if let Handling::Handled = self.handle_special_node(msg_id, incoming_id, &message) {
                return;
            }
        } else if msg_id == special::SHUTDOWN
            && (message.target_id == self.id_base || message.target_id == BROADCAST_ID)
        {
            self.handle_shutdown(&message);
            if message.target_id == self.id_base {
                return;
            }
        }
        if message.too_old() {
            self.stats.count_dropped();
            return;
        }
        self.route_message(msg_id, incoming_id, &mut message);
    }

    fn handle_parent_message(
        &mut self,
        age_inc: Duration,
        msg_id: MessageId,
        msg_age: Duration,
        mut message: Message,
    ) {
        message.add_age(msg_age).add_age(age_inc);
        self.stats.add_age_sample(message.age);

        if special::is_special(msg_id) {
            match msg_id {
                special::BYE_BYE_ENDPOINT | special::BYE_BYE_ROUTER | special::BYE_BYE_BRIDGE => {
                    self.parent.handle_bye(msg_id, &message);
                    return;
                }
                special::CONFIRM_ID => {
                    self.parent.confirm_id(&message);
                    return;
                }
                _ => {
                    let incoming_id = self.parent.id();
                    if let Handling::Handled =
                        self.handle_special_common(msg_id, incoming_id, &message)
                    {
                        return;
                    }
                    self.route_message(msg_id, self.id_base, &mut message);
                    return;
                }
            }
        }
        if message.too_old() {
            self.stats.count_dropped();
            return;
        }
        let incoming_id = self.parent.id();
        self.route_message(msg_id, incoming_id, &mut message);
    }

    fn route_message(
        &mut self,
        msg_id: MessageId,
        incoming_id: EndpointId,
        message: &mut Message,
    ) -> bool {
        if message.too_many_hops(self.config.max_hops) {
            warn!(message = %msg_id, "message discarded after too many hops");
            self.stats.count_dropped();
            return false;
        }
        message.add_hop();

        if message.target_id != BROADCAST_ID {
            self.route_targeted_message(msg_id, incoming_id, message)
        } else {
            self.route_broadcast_message(msg_id, incoming_id, message)
        }
    }

    fn route_targeted_message(
        &mut self,
        msg_id: MessageId,
        incoming_id: EndpointId,
        message: &Message,
    ) -> bool {
        let target = message.target_id;
        let mut has_routed = false;

        if let Some(outgoing_id) = self.endpoint_idx.get(&target).copied() {
            if outgoing_id == self.id_base {
                // The target is reachable through the parent router
                has_routed |= self.parent.send(msg_id, message);
            } else if let Some(node) = self.nodes.get_mut(&outgoing_id) {
                if node.is_allowed(msg_id) {
                    self.stats.count_forwarded();
                    has_routed = node.send(msg_id, message);
                }
            }
        }

        if !has_routed {
            if let Some(node) = self.nodes.get_mut(&target) {
                if node.is_allowed(msg_id) {
                    self.stats.count_forwarded();
                    has_routed = node.send(msg_id, message);
                }
            }
        }

        if !has_routed && !self.is_recently_disconnected(target) {
            // The fallback: offer the message to every link that may lead
            // to another router; hop count bounds cyclic topologies
            for (&outgoing_id, node) in self.nodes.iter_mut() {
                if outgoing_id != incoming_id {
                    has_routed |= node.try_route(msg_id, message);
                }
            }
            if incoming_id != self.id_base {
                has_routed |= self.parent.send(msg_id, message);
            }
        }
        has_routed
    }

    fn route_broadcast_message(
        &mut self,
        msg_id: MessageId,
        incoming_id: EndpointId,
        message: &Message,
    ) -> bool {
        for (&outgoing_id, node) in self.nodes.iter_mut() {
            if outgoing_id != incoming_id && node.is_allowed(msg_id) {
                self.stats.count_forwarded();
                node.send(msg_id, message);
            }
        }
        if incoming_id != self.id_base {
            self.parent.send(msg_id, message);
        }
        true
    }

    // ------------------------------------------------------------------
    // special messages
    // ------------------------------------------------------------------

    fn handle_special_node(
        &mut self,
        msg_id: MessageId,
        incoming_id: EndpointId,
        message: &Message,
    ) -> Handling {
        trace!(
            message = %msg_id,
            source = message.source_id,
            target = message.target_id,
            "router handling special message",
        );
        match msg_id {
            special::NOT_A_ROUTER => {
                if incoming_id == message.source_id {
                    if let Some(node) = self.nodes.get_mut(&incoming_id) {
                        node.mark_not_a_router();
                        debug!(source = message.source_id, "node is not a router");
                    }
                }
                Handling::Handled
            }
            special::CLEAR_BLOCK_LIST => {
                info!(source = message.source_id, "clearing link block list");
                if let Some(node) = self.nodes.get_mut(&incoming_id) {
                    node.clear_block_list();
                }
                Handling::Handled
            }
            special::CLEAR_ALLOW_LIST => {
                info!(source = message.source_id, "clearing link allow list");
                if let Some(node) = self.nodes.get_mut(&incoming_id) {
                    node.clear_allow_list();
                }
                Handling::Handled
            }
            special::MSG_ALLOW_LIST => self.handle_msg_allow(incoming_id, message),
            special::MSG_BLOCK_LIST => self.handle_msg_block(incoming_id, message),
            special::BYE_BYE_ENDPOINT | special::BYE_BYE_ROUTER | special::BYE_BYE_BRIDGE => {
                debug!(
                    method = %msg_id.method,
                    source = message.source_id,
                    "received bye-bye from node",
                );
                if let Some(node) = self.nodes.get_mut(&incoming_id) {
                    node.handle_bye_bye();
                }
                self.endpoint_idx.remove(&message.source_id);
                self.endpoint_infos.remove(&message.source_id);
                Handling::Forward
            }
            _ => self.handle_special_common(msg_id, incoming_id, message),
        }
    }

    fn handle_special_common(
        &mut self,
        msg_id: MessageId,
        incoming_id: EndpointId,
        message: &Message,
    ) -> Handling {
        match msg_id {
            special::PING => self.handle_ping(message),
            special::STILL_ALIVE => {
                self.update_endpoint_info(incoming_id, message);
                Handling::Forward
            }
            special::SUBSCRIBE_TO => self.handle_subscribed(incoming_id, message),
            special::UNSUBSCRIBE_FROM | special::NOT_SUBSCRIBED_TO => {
                self.handle_not_subscribed(incoming_id, message)
            }
            special::QUERY_SUBSCRIBERS => self.handle_subscribers_query(message),
            special::QUERY_SUBSCRIPTIONS => self.handle_subscriptions_query(message),
            special::BLOB_FRAGMENT | special::BLOB_PREPARE => self.handle_blob_fragment(msg_id, message),
            special::BLOB_RESEND => self.handle_blob_resend(message),
            special::ROUTER_CERT_QUERY => self.handle_router_certificate_query(message),
            special::ENDPOINT_CERT_QUERY => self.handle_endpoint_certificate_query(message),
            special::TOPOLOGY_QUERY => self.handle_topology_query(message),
            special::STATS_QUERY => self.handle_stats_query(message),
            special::PONG
            | special::TOPOLOGY_ROUTER_CONN
            | special::TOPOLOGY_BRIDGE_CONN
            | special::TOPOLOGY_ENDPOINT
            | special::STATS_ROUTER
            | special::STATS_BRIDGE
            | special::STATS_ENDPOINT
            | special::STATS_CONNECTION => Handling::Forward,
            special::REQUEST_ID | special::MSG_FLOW_INFO | special::ANNOUNCE_ENDPOINT_ID => {
                Handling::Handled
            }
            special::ASSIGN_ID | special::CONFIRM_ID => Handling::Handled,
            _ => {
                warn!(
                    message = %msg_id,
                    source = message.source_id,
                    "unhandled special message",
                );
                Handling::Forward
            }
        }
    }

    fn update_endpoint_info(
        &mut self,
        incoming_id: EndpointId,
        message: &Message,
    ) -> &mut RouterEndpointInfo {
        self.endpoint_idx.insert(message.source_id, incoming_id);
        let idle_timeout = self.config.endpoint_idle_timeout;
        let info = self
            .endpoint_infos
            .entry(message.source_id)
            .or_insert_with(|| RouterEndpointInfo::new(idle_timeout));
        // The sequence number carries the instance id in these messages
        info.assign_instance_id(message);
        info
    }

    fn handle_ping(&mut self, message: &Message) -> Handling {
        if message.target_id == self.id_base {
            let mut response = Message::new();
            response.setup_response(message);
            response.set_source_id(self.id_base);
            self.route_message(special::PONG, self.id_base, &mut response);
            return Handling::Handled;
        }
        Handling::Forward
    }

    fn handle_subscribed(&mut self, incoming_id: EndpointId, message: &Message) -> Handling {
        if let Ok(sub_msg_id) = payload::decode_message_id(message.content()) {
            debug!(
                source = message.source_id,
                message = %sub_msg_id,
                "endpoint subscribes to message",
            );
            self.update_endpoint_info(incoming_id, message)
                .add_subscription(sub_msg_id);
        }
        Handling::Forward
    }

    fn handle_not_subscribed(&mut self, incoming_id: EndpointId, message: &Message) -> Handling {
        if let Ok(sub_msg_id) = payload::decode_message_id(message.content()) {
            debug!(
                source = message.source_id,
                message = %sub_msg_id,
                "endpoint unsubscribes from message",
            );
            self.update_endpoint_info(incoming_id, message)
                .remove_subscription(sub_msg_id);
        }
        Handling::Forward
    }

    fn handle_msg_allow(&mut self, incoming_id: EndpointId, message: &Message) -> Handling {
        if let Ok(alw_msg_id) = payload::decode_message_id(message.content()) {
            debug!(source = message.source_id, message = %alw_msg_id, "node allowing message");
            if let Some(node) = self.nodes.get_mut(&incoming_id) {
                node.allow_message(alw_msg_id);
            }
            self.update_endpoint_info(incoming_id, message);
            return Handling::Handled;
        }
        Handling::Forward
    }

    fn handle_msg_block(&mut self, incoming_id: EndpointId, message: &Message) -> Handling {
        if let Ok(blk_msg_id) = payload::decode_message_id(message.content()) {
            // Special messages cannot be blocked
            if !special::is_special(blk_msg_id) {
                debug!(source = message.source_id, message = %blk_msg_id, "node blocking message");
                if let Some(node) = self.nodes.get_mut(&incoming_id) {
                    node.block_message(blk_msg_id);
                }
                self.update_endpoint_info(incoming_id, message);
                return Handling::Handled;
            }
        }
        Handling::Forward
    }

    fn handle_subscribers_query(&mut self, message: &Message) -> Handling {
        let cached = self.endpoint_infos.get(&message.target_id).and_then(|info| {
            if info.instance_id == 0 {
                return None;
            }
            let sub_msg_id = payload::decode_message_id(message.content()).ok()?;
            Some((
                info.instance_id,
                info.subscribes_to(sub_msg_id),
                info.not_subscribed_to(sub_msg_id),
            ))
        });
        if let Some((instance_id, subscribed, not_subscribed)) = cached {
            // Answer from the cache on the endpoint's behalf
            if subscribed {
                let mut response = Message::with_payload(message.content().to_vec());
                response.setup_response(message);
                response.set_source_id(message.target_id);
                response.set_sequence_no(instance_id);
                self.route_message(special::SUBSCRIBE_TO, self.id_base, &mut response);
            }
            if not_subscribed {
                let mut response = Message::with_payload(message.content().to_vec());
                response.setup_response(message);
                response.set_source_id(message.target_id);
                response.set_sequence_no(instance_id);
                self.route_message(special::NOT_SUBSCRIBED_TO, self.id_base, &mut response);
            }
        }
        Handling::Forward
    }

    fn handle_subscriptions_query(&mut self, message: &Message) -> Handling {
        let cached = self.endpoint_infos.get(&message.target_id).and_then(|info| {
            if info.instance_id == 0 {
                return None;
            }
            Some((info.instance_id, info.subscriptions.clone()))
        });
        if let Some((instance_id, subscriptions)) = cached {
            for sub_msg_id in subscriptions {
                let mut content = Vec::new();
                if payload::encode_message_id(sub_msg_id, &mut content).is_ok() {
                    let mut response = Message::with_payload(content);
                    response.setup_response(message);
                    response.set_source_id(message.target_id);
                    response.set_sequence_no(instance_id);
                    self.route_message(special::SUBSCRIBE_TO, self.id_base, &mut response);
                }
            }
        }
        Handling::Forward
    }

    fn handle_router_certificate_query(&mut self, message: &Message) -> Handling {
        let pem = self.context.own_certificate_pem().to_vec();
        self.post_blob(
            special::ROUTER_CERT_PEM,
            INVALID_ID,
            message.source_id,
            message.sequence_no,
            &pem,
            CERT_BLOB_MAX_TIME,
            Priority::High,
        );
        Handling::Handled
    }

    fn handle_endpoint_certificate_query(&mut self, message: &Message) -> Handling {
        let Some(pem) = self
            .context
            .remote_certificate_pem(message.target_id)
            .map(<[u8]>::to_vec)
        else {
            return Handling::Forward;
        };
        self.post_blob(
            special::ENDPOINT_CERT_PEM,
            message.target_id,
            message.source_id,
            message.sequence_no,
            &pem,
            CERT_BLOB_MAX_TIME,
            Priority::High,
        );
        Handling::Handled
    }

    fn handle_topology_query(&mut self, message: &Message) -> Handling {
        let mut links: Vec<(EndpointId, weft_core::connection::ConnectionKind)> = self
            .nodes
            .iter()
            .map(|(&node_id, node)| (node_id, node.kind_of_connection()))
            .collect();
        if self.parent.is_configured() {
            links.push((self.parent.remote_id(), self.parent.kind_of_connection()));
        }
        for (remote_id, connection_kind) in links {
            let info = RouterTopologyInfo {
                router_id: self.id_base,
                remote_id,
                instance_id: self.instance_id,
                connection_kind,
            };
            let mut content = Vec::new();
            if info.encode(&mut content).is_ok() {
                let mut response = Message::with_payload(content);
                response.setup_response(message);
                response.set_source_id(self.id_base);
                self.route_message(special::TOPOLOGY_ROUTER_CONN, self.id_base, &mut response);
            }
        }
        Handling::Forward
    }

    fn handle_stats_query(&mut self, message: &Message) -> Handling {
        self.stats.update_window();

        let snapshot = self.stats.snapshot();
        let mut content = Vec::new();
        if snapshot.encode(&mut content).is_ok() {
            let mut response = Message::with_payload(content);
            response.setup_response(message);
            response.set_source_id(self.id_base);
            self.route_message(special::STATS_ROUTER, self.id_base, &mut response);
        }

        let mut link_stats: Vec<ConnectionStatistics> = Vec::new();
        for (&node_id, node) in &self.nodes {
            let mut stats = ConnectionStatistics {
                local_id: self.id_base,
                remote_id: node_id,
                ..Default::default()
            };
            if node.query_statistics(&mut stats) {
                link_stats.push(stats);
            }
        }
        if self.parent.is_configured() {
            let mut stats = ConnectionStatistics {
                local_id: self.id_base,
                remote_id: self.parent.remote_id(),
                ..Default::default()
            };
            if self.parent.query_statistics(&mut stats) {
                link_stats.push(stats);
            }
        }
        for stats in link_stats {
            let mut content = Vec::new();
            if payload::encode_connection_statistics(&stats, &mut content).is_ok() {
                let mut response = Message::with_payload(content);
                response.setup_response(message);
                response.set_source_id(self.id_base);
                self.route_message(special::STATS_CONNECTION, self.id_base, &mut response);
            }
        }
        Handling::Forward
    }

    fn handle_blob_fragment(&mut self, msg_id: MessageId, message: &Message) -> Handling {
        let mut factory = |content_id: MessageId, size: u64| -> Option<Box<dyn TargetBlobIo>> {
            // Only endpoint certificates get a default in-memory target
            if content_id == special::ENDPOINT_CERT_PEM {
                Some(Box::new(BufferTarget::new(size)))
            } else {
                None
            }
        };
        if self.blobs.process_incoming(&mut factory, msg_id, message) {
            self.blobs.handle_complete();
            let mut finished: Vec<(MessageId, Message)> = Vec::new();
            self.blobs.fetch_all(&mut |content_id, blob_message| {
                finished.push((content_id, blob_message.clone()));
                true
            });
            for (content_id, blob_message) in finished {
                self.handle_blob(content_id, &blob_message);
            }
        }
        if message.target_id == self.id_base {
            Handling::Handled
        } else {
            Handling::Forward
        }
    }

    fn handle_blob_resend(&mut self, message: &Message) -> Handling {
        if message.target_id == self.id_base {
            self.blobs.process_resend(message);
            return Handling::Handled;
        }
        Handling::Forward
    }

    fn handle_blob(&mut self, content_id: MessageId, message: &Message) {
        if content_id == special::ENDPOINT_CERT_PEM {
            trace!(source = message.source_id, "received endpoint certificate");
            if self
                .context
                .add_remote_certificate_pem(message.source_id, message.content())
            {
                debug!(source = message.source_id, "stored endpoint certificate");
            }
            if message.target_id != INVALID_ID && message.target_id != self.id_base {
                let content = message.content().to_vec();
                self.post_blob(
                    special::ENDPOINT_CERT_PEM,
                    message.source_id,
                    message.target_id,
                    message.sequence_no,
                    &content,
                    CERT_BLOB_MAX_TIME,
                    Priority::High,
                );
            }
        }
    }

    fn handle_shutdown(&mut self, message: &Message) {
        let Ok(request) = ShutdownRequest::decode(message) else {
            warn!(source = message.source_id, "undecodable shutdown request");
            return;
        };
        info!(
            source = request.source_id,
            age_ms = request.age.as_millis() as u64,
            "received shutdown request",
        );
        if request.is_acceptable(&self.config.shutdown) {
            info!("shutdown request is valid, shutting down");
            self.do_shutdown = true;
            self.shutdown_delay.reset();
        } else {
            warn!("ignoring shutdown request");
        }
    }

    // ------------------------------------------------------------------
    // work loop
    // ------------------------------------------------------------------

    fn update_connections(&mut self) -> bool {
        let mut something_done = false;
        if self.use_workers {
            let mut node_refs: Vec<&mut RoutedNode> = self.nodes.values_mut().collect();
            something_done |=
                workers::update_connections_parallel(&mut node_refs, self.worker_count);
        } else {
            for node in self.nodes.values_mut() {
                something_done |= node.update_connection();
            }
        }
        something_done |= self.parent.update(self.id_base);

        if !self.nodes.is_empty() || !self.pending.is_empty() {
            self.no_connection_timeout.reset();
        }
        something_done
    }

    fn do_work(&mut self) -> bool {
        let mut something_done = false;
        something_done |= self.handle_pending();
        something_done |= self.handle_accept();
        something_done |= self.route_all();
        something_done |= self.update_connections();
        something_done
    }

    /// Performs one update cycle: maintenance, then up to `count` units
    /// of work while any of them reports progress.
    ///
    /// Returns true when anything was done; callers use this to pace
    /// their idle sleeping.
    pub fn update(&mut self, count: usize) -> bool {
        let mut something_done = self.do_maintenance();
        let mut n = count.max(1);
        loop {
            let worked = self.do_work();
            something_done |= worked;
            n -= 1;
            if !worked || n == 0 {
                break;
            }
        }
        something_done
    }

    /// Announces departure on every link.
    pub fn say_bye(&mut self) {
        let mut message = Message::new();
        message.set_source_id(self.id_base);
        for node in self.nodes.values_mut() {
            node.send(special::BYE_BYE_ROUTER, &message);
            node.update_connection();
        }
        self.parent.send(special::BYE_BYE_ROUTER, &message);
    }

    /// Cleans up every connection and logs final statistics.
    pub fn cleanup(&mut self) {
        for node in self.nodes.values_mut() {
            node.cleanup_connection();
        }
        info!(
            forwarded = self.stats.forwarded(),
            dropped = self.stats.dropped(),
            avg_msg_age_us = self.stats.avg_message_age().as_micros() as u64,
            "forwarded messages in total",
        );
    }

    /// Graceful shutdown: says bye-bye, drains updates briefly, cleans up.
    pub fn finish(&mut self) {
        self.say_bye();
        let drain = Timeout::new(Duration::from_secs(1));
        while !drain.is_expired() {
            self.update(8);
        }
        self.cleanup();
    }
}
