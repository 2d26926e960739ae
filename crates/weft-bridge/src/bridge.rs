//! The bridge node.

use std::{
    io::{Read, Write},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info, trace, warn};

use weft_core::{
    config::BridgeConfig,
    connection::Connection,
    constants::MIN_CONNECTION_DATA_SIZE,
    message::{EndpointId, Message, MessageId, INVALID_ID},
    time::Timeout,
};
use weft_protocol::{
    payload::{BridgeStatistics, BridgeTopologyInfo},
    special,
};

use crate::state::BridgeState;

enum Handling {
    Handled,
    Forward,
}

/// Per-direction forwarding counters.
#[derive(Debug, Default)]
struct DirectionStats {
    forwarded: u64,
    dropped: u64,
    age_sum: Duration,
}

impl DirectionStats {
    fn avg_age(&self) -> Duration {
        self.age_sum / (self.forwarded + self.dropped + 1) as u32
    }
}

/// A bridge joining a local router connection with a byte-stream pair.
///
/// The bus thread drives [`Bridge::update`]; the stream ends run on the
/// worker threads owned through the shared [`BridgeState`].
pub struct Bridge {
    config: BridgeConfig,
    id: EndpointId,
    instance_id: u64,
    connection: Option<Box<dyn Connection>>,
    state: Option<Arc<BridgeState>>,
    streams: Option<(Box<dyn Read + Send>, Box<dyn Write + Send>)>,
    stats: BridgeStatistics,
    conn_to_output: DirectionStats,
    input_to_conn: DirectionStats,
    prev_forwarded_i2c: u64,
    forwarded_since_stat: Instant,
    startup_time: Instant,
    no_id_timeout: Timeout,
    no_connection_timeout: Timeout,
    state_count: u32,
}

impl Bridge {
    /// Creates a bridge with the given configuration.
    pub fn new(config: BridgeConfig) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);
        let instance_id = (u64::from(std::process::id()) << 32) | nanos;
        let no_id_timeout = Timeout::expired(config.no_id_retry);
        let no_connection_timeout = Timeout::new(config.no_connection_timeout);
        Self {
            config,
            id: INVALID_ID,
            instance_id,
            connection: None,
            state: None,
            streams: None,
            stats: BridgeStatistics::default(),
            conn_to_output: DirectionStats::default(),
            input_to_conn: DirectionStats::default(),
            prev_forwarded_i2c: 0,
            forwarded_since_stat: Instant::now(),
            startup_time: Instant::now(),
            no_id_timeout,
            no_connection_timeout,
            state_count: 0,
        }
    }

    /// The id assigned to this bridge by its router, or [`INVALID_ID`].
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// True once the bridge has an assigned id.
    pub fn has_id(&self) -> bool {
        self.id != INVALID_ID
    }

    /// This bridge's process instance id.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Installs the connection to the neighboring router.
    pub fn add_connection(&mut self, connection: Box<dyn Connection>) {
        info!(
            kind = ?connection.kind(),
            r#type = %connection.type_id(),
            "assigning bridge connection",
        );
        self.connection = Some(connection);
    }

    /// Installs the byte-stream pair carrying the framed records.
    pub fn add_streams(
        &mut self,
        input: Box<dyn Read + Send>,
        output: Box<dyn Write + Send>,
    ) {
        self.streams = Some((input, output));
    }

    /// Records decoded from the input stream that failed to parse.
    pub fn decode_errors(&self) -> u64 {
        self.state.as_ref().map(|state| state.decode_errors()).unwrap_or(0)
    }

    /// Messages forwarded from the connection to the output stream.
    pub fn forwarded_to_output(&self) -> u64 {
        self.conn_to_output.forwarded
    }

    /// Messages forwarded from the input stream to the connection.
    pub fn forwarded_to_connection(&self) -> u64 {
        self.input_to_conn.forwarded
    }

    fn check_state(&mut self) -> bool {
        if self.state.as_ref().is_some_and(|state| state.is_usable()) {
            return false;
        }
        let Some(connection) = &self.connection else {
            return false;
        };
        if self.streams.is_none() {
            return false;
        }
        let max_data_size = connection.max_data_size().unwrap_or(MIN_CONNECTION_DATA_SIZE);
        let max_read = self.config.max_read.unwrap_or(max_data_size * 2);
        let (input, output) = self.streams.take().expect("streams staged");
        let state = BridgeState::new(max_read);
        state.start(input, output);
        self.state = Some(state);
        self.state_count += 1;
        debug!(max_read, "bridge stream state started");
        true
    }

    fn update_connection(&mut self) -> bool {
        let mut something_done = false;
        if let Some(connection) = &mut self.connection {
            if self.id == INVALID_ID && self.no_id_timeout.is_expired() {
                debug!("requesting bridge id");
                connection.send(special::REQUEST_ID, &Message::new());
                self.no_id_timeout.reset();
                something_done = true;
            }
            if connection.update() {
                something_done = true;
                self.no_connection_timeout.reset();
            }
        }
        something_done
    }

    fn do_send(&mut self, msg_id: MessageId, message: &mut Message) -> bool {
        message.add_hop();
        if let Some(connection) = &mut self.connection {
            if connection.send(msg_id, message) {
                trace!(message = %msg_id, "forwarding message to connection");
                return true;
            }
        }
        false
    }

    fn send(&mut self, msg_id: MessageId, message: &mut Message) -> bool {
        message.set_source_id(self.id);
        self.do_send(msg_id, message)
    }

    fn do_push(&mut self, msg_id: MessageId, message: &mut Message) -> bool {
        if let Some(state) = &self.state {
            message.add_hop();
            state.push(msg_id, message);
            trace!(message = %msg_id, "forwarding message to stream");
            return true;
        }
        false
    }

    fn push(&mut self, msg_id: MessageId, message: &mut Message) -> bool {
        message.set_source_id(self.id);
        self.do_push(msg_id, message)
    }

    fn handle_id_assigned(&mut self, message: &Message) -> Handling {
        if !self.has_id() {
            self.id = message.target_id;
            debug!(id = self.id, "assigned bridge id by router");
        }
        Handling::Handled
    }

    fn handle_id_confirmed(&mut self, message: &Message) -> Handling {
        if self.has_id() {
            if self.id != message.target_id {
                warn!(
                    current = self.id,
                    confirmed = message.target_id,
                    "mismatching current and confirmed ids",
                );
            }
        } else {
            warn!(confirmed = message.target_id, "confirming unset id");
        }
        Handling::Handled
    }

    fn handle_ping(&mut self, message: &Message, to_connection: bool) -> Handling {
        if self.has_id() && self.id == message.target_id {
            let mut response = Message::new();
            response.setup_response(message);
            if to_connection {
                self.push(special::PONG, &mut response);
            } else {
                self.send(special::PONG, &mut response);
            }
            return Handling::Handled;
        }
        Handling::Forward
    }

    fn handle_topo_bridge_conn(&mut self, message: &Message, to_connection: bool) -> Handling {
        if to_connection {
            // Complete the opposite end of the record coming from the peer
            // bridge and hand it to the connection side
            if let Ok(mut info) = BridgeTopologyInfo::decode(message.content()) {
                info.opposite_id = self.id;
                let mut content = Vec::new();
                if info.encode(&mut content).is_ok() {
                    let mut response = Message::with_payload(content);
                    response.setup_response(message);
                    response.target_id = message.target_id;
                    self.send(special::TOPOLOGY_BRIDGE_CONN, &mut response);
                    return Handling::Handled;
                }
            }
        }
        Handling::Forward
    }

    fn handle_topology_query(&mut self, message: &Message, to_connection: bool) -> Handling {
        let info = BridgeTopologyInfo {
            bridge_id: self.id,
            opposite_id: INVALID_ID,
            instance_id: self.instance_id,
        };
        let mut content = Vec::new();
        if info.encode(&mut content).is_ok() {
            let mut response = Message::with_payload(content);
            response.setup_response(message);
            if to_connection {
                self.do_push(special::TOPOLOGY_BRIDGE_CONN, &mut response);
            } else {
                self.send(special::TOPOLOGY_BRIDGE_CONN, &mut response);
            }
        }
        Handling::Forward
    }

    fn handle_stats_query(&mut self, message: &Message, to_connection: bool) -> Handling {
        self.stats.forwarded_messages = self.input_to_conn.forwarded as i64;
        self.stats.dropped_messages = self.input_to_conn.dropped as i64;
        self.stats.uptime_seconds = self.startup_time.elapsed().as_secs() as i64;
        self.stats.message_age_milliseconds =
            self.input_to_conn.avg_age().as_millis() as i32;

        let elapsed = self.forwarded_since_stat.elapsed();
        if elapsed >= Duration::from_secs(15) {
            self.forwarded_since_stat = Instant::now();
            self.stats.messages_per_second =
                ((self.input_to_conn.forwarded - self.prev_forwarded_i2c) as f32
                    / elapsed.as_secs_f32()) as i32;
            self.prev_forwarded_i2c = self.input_to_conn.forwarded;
        }

        let mut content = Vec::new();
        if self.stats.encode(&mut content).is_ok() {
            let mut response = Message::with_payload(content);
            response.setup_response(message);
            if to_connection {
                self.do_push(special::STATS_BRIDGE, &mut response);
            } else {
                self.send(special::STATS_BRIDGE, &mut response);
            }
        }
        Handling::Forward
    }

    fn handle_special(
        &mut self,
        msg_id: MessageId,
        message: &Message,
        to_connection: bool,
    ) -> Handling {
        if !special::is_special(msg_id) {
            return Handling::Forward;
        }
        trace!(
            message = %msg_id,
            source = message.source_id,
            target = message.target_id,
            "bridge handling special message",
        );
        match msg_id {
            special::ASSIGN_ID => self.handle_id_assigned(message),
            special::CONFIRM_ID => self.handle_id_confirmed(message),
            special::PING => self.handle_ping(message, to_connection),
            special::TOPOLOGY_BRIDGE_CONN => self.handle_topo_bridge_conn(message, to_connection),
            special::TOPOLOGY_QUERY => self.handle_topology_query(message, to_connection),
            special::STATS_QUERY => self.handle_stats_query(message, to_connection),
            special::MSG_FLOW_INFO => Handling::Handled,
            _ => Handling::Forward,
        }
    }

    fn forward_messages(&mut self) -> bool {
        let mut something_done = false;
        let mut batch: Vec<(MessageId, Duration, Message)> = Vec::new();

        // connection -> output stream
        if let Some(connection) = &mut self.connection {
            something_done |= connection.fetch_messages(&mut |msg_id, age, message| {
                batch.push((msg_id, age, message.clone()));
                true
            });
        }
        for (msg_id, msg_age, mut message) in batch.drain(..) {
            message.add_age(msg_age);
            self.conn_to_output.age_sum += message.age;
            if message.too_old() {
                self.conn_to_output.dropped += 1;
                continue;
            }
            if let Handling::Handled = self.handle_special(msg_id, &message, false) {
                continue;
            }
            if self.do_push(msg_id, &mut message) {
                self.conn_to_output.forwarded += 1;
            } else {
                self.conn_to_output.dropped += 1;
            }
        }
        if let Some(state) = &self.state {
            state.notify_output_ready();
        }

        // input stream -> connection
        if let Some(state) = &self.state {
            something_done |= state.fetch_messages(&mut |msg_id, age, message| {
                batch.push((msg_id, age, message.clone()));
                true
            });
        }
        for (msg_id, queue_age, mut message) in batch.drain(..) {
            message.add_age(queue_age);
            self.input_to_conn.age_sum += message.age;
            if message.too_old() {
                self.input_to_conn.dropped += 1;
                continue;
            }
            if let Handling::Handled = self.handle_special(msg_id, &message, true) {
                continue;
            }
            if self.do_send(msg_id, &mut message) {
                self.input_to_conn.forwarded += 1;
            } else {
                self.input_to_conn.dropped += 1;
            }
        }

        something_done
    }

    /// Performs one update cycle on the bus thread.
    pub fn update(&mut self) -> bool {
        let had_id = self.has_id();
        let mut something_done = false;
        something_done |= self.check_state();
        something_done |= self.update_connection();
        something_done |= self.forward_messages();

        // Processing the messages may have assigned the id
        if self.has_id() && !had_id {
            debug!(id = self.id, "announcing bridge id");
            let mut announcement = Message::new();
            self.send(special::ANNOUNCE_ID, &mut announcement);
            something_done = true;
        }
        something_done
    }

    /// True once the byte streams are unrecoverable or the bridge had no
    /// connection activity for too long.
    pub fn is_done(&self) -> bool {
        let streams_dead = match &self.state {
            Some(state) => !state.is_usable() && self.streams.is_none(),
            None => false,
        };
        streams_dead || self.no_connection_timeout.is_expired()
    }

    /// Announces departure on both sides.
    pub fn say_bye(&mut self) {
        let mut message = Message::new();
        message.set_source_id(self.id);
        if let Some(connection) = &mut self.connection {
            connection.send(special::BYE_BYE_BRIDGE, &message);
            connection.update();
        }
        if self.state.is_some() {
            let mut bye = message.clone();
            self.do_push(special::BYE_BYE_BRIDGE, &mut bye);
            if let Some(state) = &self.state {
                state.notify_output_ready();
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        self.forward_messages();
        self.update_connection();
    }

    /// Cleans up the connection and logs final statistics.
    pub fn cleanup(&mut self) {
        if let Some(connection) = &mut self.connection {
            connection.cleanup();
        }
        if let Some(state) = &self.state {
            info!(
                forwarded = state.forwarded_messages(),
                dropped = state.dropped_messages(),
                decode_errors = state.decode_errors(),
                state_count = self.state_count,
                "forwarded messages in total to output stream",
            );
        }
        info!(
            forwarded = self.conn_to_output.forwarded,
            dropped = self.conn_to_output.dropped,
            avg_msg_age_us = self.conn_to_output.avg_age().as_micros() as u64,
            "forwarded messages in total to output queue",
        );
        info!(
            forwarded = self.input_to_conn.forwarded,
            dropped = self.input_to_conn.dropped,
            avg_msg_age_us = self.input_to_conn.avg_age().as_micros() as u64,
            "forwarded messages in total to connection",
        );
    }

    /// Graceful shutdown: says bye-bye, drains updates briefly, cleans up.
    pub fn finish(&mut self) {
        self.say_bye();
        let drain = Timeout::new(Duration::from_millis(250));
        while !drain.is_expired() {
            self.update();
        }
        self.cleanup();
    }
}
