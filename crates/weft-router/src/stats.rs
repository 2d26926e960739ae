//! Router statistics accumulation.

use std::time::{Duration, Instant};

use tracing::info;

use weft_core::time::SlidingAverage;
use weft_protocol::payload::{MessageFlowInfo, RouterStatistics};

/// How many forwarded messages between periodic stat log lines.
const LOG_INTERVAL_MESSAGES: i64 = 1_000_000;

/// Accumulates the router's counters, the rolling messages-per-second
/// window and the smoothed average message age.
pub struct RouterStats {
    stats: RouterStatistics,
    flow_info: MessageFlowInfo,
    message_age_avg: SlidingAverage,
    window: Duration,
    startup_time: Instant,
    forwarded_since_stat: Instant,
    forwarded_since_log: Instant,
    prev_forwarded_messages: i64,
}

impl RouterStats {
    /// Creates zeroed statistics with the given rate window.
    pub fn new(window: Duration) -> Self {
        let now = Instant::now();
        Self {
            stats: RouterStatistics::default(),
            flow_info: MessageFlowInfo::default(),
            message_age_avg: SlidingAverage::default(),
            window,
            startup_time: now,
            forwarded_since_stat: now,
            forwarded_since_log: now,
            prev_forwarded_messages: 0,
        }
    }

    /// Counts one forwarded message and periodically logs a stat line.
    pub fn count_forwarded(&mut self) {
        self.stats.forwarded_messages += 1;
        if self.stats.forwarded_messages % LOG_INTERVAL_MESSAGES == 0 {
            self.log_stats();
        }
    }

    /// Counts one dropped message.
    pub fn count_dropped(&mut self) {
        self.stats.dropped_messages += 1;
    }

    /// Total dropped messages so far.
    pub fn dropped(&self) -> i64 {
        self.stats.dropped_messages
    }

    /// Total forwarded messages so far.
    pub fn forwarded(&self) -> i64 {
        self.stats.forwarded_messages
    }

    /// Folds a message age sample into the smoothed average.
    pub fn add_age_sample(&mut self, age: Duration) {
        self.message_age_avg.add(age);
    }

    /// The smoothed average message age.
    pub fn avg_message_age(&self) -> Duration {
        self.message_age_avg.get()
    }

    /// Recomputes the rate window when due.
    ///
    /// Returns new flow information when the average message age changed
    /// since the last window, so the router can notify its nodes.
    pub fn update_window(&mut self) -> Option<MessageFlowInfo> {
        let now = Instant::now();
        let elapsed = now - self.forwarded_since_stat;
        if elapsed < self.window {
            return None;
        }
        self.forwarded_since_stat = now;

        self.stats.messages_per_second =
            ((self.stats.forwarded_messages - self.prev_forwarded_messages) as f32
                / elapsed.as_secs_f32()) as i32;
        self.prev_forwarded_messages = self.stats.forwarded_messages;

        let avg_age_us = self.message_age_avg.get().as_micros() as i32;
        self.stats.message_age_us = avg_age_us;

        let avg_age_ms = (avg_age_us / 1000) as u32;
        if self.flow_info.avg_msg_age_ms != avg_age_ms {
            self.flow_info = MessageFlowInfo { avg_msg_age_ms: avg_age_ms };
            return Some(self.flow_info);
        }
        None
    }

    /// A snapshot of the counters with the uptime filled in.
    pub fn snapshot(&mut self) -> RouterStatistics {
        self.stats.uptime_seconds = self.startup_time.elapsed().as_secs() as i64;
        self.stats
    }

    /// Logs the accumulated counters.
    pub fn log_stats(&mut self) {
        let now = Instant::now();
        let interval = now - self.forwarded_since_log;
        if interval > Duration::ZERO {
            let msgs_per_sec = LOG_INTERVAL_MESSAGES as f32 / interval.as_secs_f32();
            info!(
                forwarded = self.stats.forwarded_messages,
                dropped = self.stats.dropped_messages,
                avg_msg_age_us = self.message_age_avg.get().as_micros() as u64,
                msgs_per_sec,
                "forwarded messages",
            );
        }
        self.forwarded_since_log = now;
    }
}
