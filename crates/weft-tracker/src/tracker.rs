//! The remote node tracker.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::debug;

use weft_core::{
    connection::ConnectionStatistics,
    message::EndpointId,
};
use weft_protocol::payload::RouterTopologyInfo;

use crate::{
    change::RemoteNodeChanges,
    node::{NodeConnection, RemoteHost, RemoteInstance, RemoteNode},
};

/// Tracks the state of remote nodes, instances, hosts and the connections
/// between them.
///
/// The tracker exclusively owns its entity maps; entities reference each
/// other by id only. Repeated host names and other descriptive strings are
/// deduplicated through an internal cache handing out shared handles.
#[derive(Debug, Default)]
pub struct RemoteNodeTracker {
    nodes: HashMap<EndpointId, RemoteNode>,
    instances: HashMap<u64, RemoteInstance>,
    hosts: HashMap<u64, RemoteHost>,
    connections: Vec<NodeConnection>,
    string_cache: HashSet<Arc<str>>,
}

impl RemoteNodeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a deduplicated shared handle for the given string.
    pub fn cached(&mut self, s: &str) -> Arc<str> {
        if let Some(cached) = self.string_cache.get(s) {
            return cached.clone();
        }
        let handle: Arc<str> = Arc::from(s);
        self.string_cache.insert(handle.clone());
        handle
    }

    /// Returns the tracked node with the given id, creating it on demand.
    pub fn get_node(&mut self, node_id: EndpointId) -> &mut RemoteNode {
        debug_assert_ne!(node_id, weft_core::message::INVALID_ID);
        self.nodes.entry(node_id).or_insert_with(|| RemoteNode::new(node_id))
    }

    /// Looks up a tracked node without creating it.
    pub fn find_node(&self, node_id: EndpointId) -> Option<&RemoteNode> {
        self.nodes.get(&node_id)
    }

    /// Removes a tracked node; returns true when it existed.
    pub fn remove_node(&mut self, node_id: EndpointId) -> bool {
        self.connections.retain(|conn| !conn.connects_node(node_id));
        self.nodes.remove(&node_id).is_some()
    }

    /// Returns the tracked instance with the given id, creating it on
    /// demand.
    pub fn get_instance(&mut self, instance_id: u64) -> &mut RemoteInstance {
        self.instances
            .entry(instance_id)
            .or_insert_with(|| RemoteInstance::new(instance_id))
    }

    /// Returns the tracked host with the given id, creating it on demand.
    pub fn get_host(&mut self, host_id: u64) -> &mut RemoteHost {
        self.hosts.entry(host_id).or_insert_with(|| RemoteHost::new(host_id))
    }

    /// Returns the connection entry for the unordered id pair, creating it
    /// on demand.
    pub fn get_connection(
        &mut self,
        node_id1: EndpointId,
        node_id2: EndpointId,
    ) -> &mut NodeConnection {
        if let Some(index) = self
            .connections
            .iter()
            .position(|conn| conn.connects(node_id1, node_id2))
        {
            return &mut self.connections[index];
        }
        self.get_node(node_id1).add_change(RemoteNodeChanges::CONNECTION_INFO);
        self.get_node(node_id2).add_change(RemoteNodeChanges::CONNECTION_INFO);
        self.connections.push(NodeConnection::new(node_id1, node_id2));
        self.connections.last_mut().expect("just pushed")
    }

    /// Iterates over all tracked nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &RemoteNode> {
        self.nodes.values()
    }

    /// Iterates mutably over all tracked nodes.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut RemoteNode> {
        self.nodes.values_mut()
    }

    /// Iterates over all tracked connections.
    pub fn connections(&self) -> impl Iterator<Item = &NodeConnection> {
        self.connections.iter()
    }

    /// Records that `node_id` currently runs as `instance_id`.
    ///
    /// A changed instance id means the remote process restarted: the node
    /// state is cleared, every connection entry touching the node is
    /// erased, and the new instance id is assigned. In all cases the node
    /// and instance are marked alive.
    pub fn notice_instance(
        &mut self,
        node_id: EndpointId,
        instance_id: u64,
    ) -> &mut RemoteNode {
        let current = self.get_node(node_id).instance_id();
        match current {
            Some(known) if known != instance_id => {
                debug!(node = node_id, instance = instance_id, "node instance changed");
                self.connections.retain(|conn| !conn.connects_node(node_id));
                let node = self.nodes.get_mut(&node_id).expect("node exists");
                node.clear();
                node.set_instance_id(instance_id);
                let host_id = node.host_id();
                if let Some(host_id) = host_id {
                    self.get_instance(instance_id).notice_alive().set_host_id(host_id);
                }
            }
            Some(_) => {
                self.get_instance(instance_id).notice_alive();
            }
            None => {
                let node = self.nodes.get_mut(&node_id).expect("node exists");
                node.set_instance_id(instance_id);
                let host_id = node.host_id();
                if let Some(host_id) = host_id {
                    self.get_instance(instance_id).notice_alive().set_host_id(host_id);
                }
            }
        }
        let node = self.nodes.get_mut(&node_id).expect("node exists");
        node.notice_alive();
        node
    }

    /// Folds a router topology record into the tracked state.
    pub fn apply_topology(&mut self, info: &RouterTopologyInfo) {
        self.notice_instance(info.router_id, info.instance_id);
        let changed = self
            .get_connection(info.router_id, info.remote_id)
            .set_kind(info.connection_kind);
        if changed {
            self.get_node(info.router_id).add_change(RemoteNodeChanges::CONNECTION_INFO);
            self.get_node(info.remote_id).add_change(RemoteNodeChanges::CONNECTION_INFO);
        }
    }

    /// Folds reported connection statistics into the tracked state.
    pub fn assign_connection_statistics(&mut self, stats: &ConnectionStatistics) {
        self.get_connection(stats.local_id, stats.remote_id).assign_statistics(stats);
        self.get_node(stats.local_id)
            .notice_alive()
            .add_change(RemoteNodeChanges::CONNECTION_INFO);
        self.get_node(stats.remote_id).add_change(RemoteNodeChanges::CONNECTION_INFO);
    }

    /// Advances alive-state tracking on every instance and host.
    pub fn update(&mut self) {
        for instance in self.instances.values_mut() {
            instance.update();
        }
        for host in self.hosts.values_mut() {
            host.update();
        }
    }
}
