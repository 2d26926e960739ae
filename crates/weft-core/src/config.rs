use std::{default::Default, time::Duration};

use crate::constants::{DEFAULT_ID_COUNT, DEFAULT_MAX_HOPS};

#[derive(Clone, Debug)]
/// Configuration options to tune router behavior.
pub struct RouterConfig {
    /// Major part of the router's endpoint id range base.
    /// None derives the base from the host id.
    pub id_major: Option<u64>,
    /// Minor part added to the id range base.
    pub id_minor: u64,
    /// Number of endpoint ids reserved for this router.
    pub id_count: u64,
    /// Max hop count before a routed message is dropped.
    pub max_hops: u8,
    /// Max age of an accepted connection that never identified itself.
    pub pending_timeout: Duration,
    /// Max silence from an endpoint before its cached info is evicted.
    pub endpoint_idle_timeout: Duration,
    /// How long a departed endpoint id suppresses the multi-router fallback.
    pub recently_disconnected_ttl: Duration,
    /// Max time without any connection before the owning loop gives up.
    pub no_connection_timeout: Duration,
    /// Window over which messages-per-second and average age are computed.
    pub stats_window: Duration,
    /// Number of worker threads for parallel connection updates.
    /// None sizes the pool from the number of CPUs.
    pub workers: Option<usize>,
    /// Shutdown request handling policy.
    pub shutdown: ShutdownConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id_major: None,
            id_minor: 0,
            id_count: DEFAULT_ID_COUNT,
            max_hops: DEFAULT_MAX_HOPS,
            pending_timeout: Duration::from_secs(30),
            endpoint_idle_timeout: Duration::from_secs(30),
            recently_disconnected_ttl: Duration::from_secs(15),
            no_connection_timeout: Duration::from_secs(30),
            stats_window: Duration::from_secs(15),
            workers: None, // Sized from CPU count
            shutdown: ShutdownConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune bridge behavior.
pub struct BridgeConfig {
    /// Max line length accepted from the input stream.
    /// None derives it as twice the connection's max payload size.
    pub max_read: Option<usize>,
    /// Max time without a usable connection before the bridge is done.
    pub no_connection_timeout: Duration,
    /// How often an id-less bridge re-requests an id from its router.
    pub no_id_retry: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_read: None, // 2x the connection max payload
            no_connection_timeout: Duration::from_secs(30),
            no_id_retry: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration of shutdown request handling.
pub struct ShutdownConfig {
    /// Delay between accepting a shutdown request and acting on it.
    pub delay: Duration,
    /// Max age of an acceptable shutdown request.
    pub max_age: Duration,
    /// Require full verification bits on shutdown requests.
    pub verify: bool,
    /// Ignore shutdown requests entirely.
    pub ignore: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            max_age: Duration::from_millis(2500),
            verify: true,
            ignore: false,
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration options for the blob transfer engine.
pub struct BlobConfig {
    /// Hint for the max fragment payload size.
    pub max_data_size: usize,
    /// How long a gap in an incoming blob may persist before a resend
    /// request is issued.
    pub resend_delay: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_data_size: crate::constants::MIN_CONNECTION_DATA_SIZE,
            resend_delay: Duration::from_millis(500),
        }
    }
}
