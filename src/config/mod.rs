//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::QueueConfig;

/// Server configuration loaded from environment variables.
/// Every field has a default so an empty environment boots a local server.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Status endpoint binding address
    pub status_addr: SocketAddr,
    /// Game traffic (UDP) binding address
    pub udp_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Worker poll period for every sync queue
    pub sync_sleep_interval_ms: u64,
    /// Workers per movement/camera/key queue
    pub sync_worker_count: usize,
    /// Pending entries per queue before new packets are dropped
    pub sync_queue_capacity: usize,
    pub sync_batch_size: usize,
    /// Handler runs longer than this are logged
    pub handler_budget_ms: u64,
    pub command_worker_count: usize,

    /// Period of the collision shape pass
    pub collision_interval_ms: u64,
    /// Edge length of a spatial index cell, in world units
    pub spatial_cell_size: f32,
    /// Packets per second accepted from one client
    pub inbound_packet_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 22003)),
            log_level: "info".to_string(),
            sync_sleep_interval_ms: 10,
            sync_worker_count: 4,
            sync_queue_capacity: 4096,
            sync_batch_size: 64,
            handler_budget_ms: 5,
            command_worker_count: 1,
            collision_interval_ms: 100,
            spatial_cell_size: 50.0,
            inbound_packet_rate: crate::util::rate_limit::INBOUND_PACKET_RATE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; unset keys keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // hosting platforms hand out PORT, fall back to STATUS_ADDR or default
        let status_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port.trim())
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT", port))?,
            None => parse(&lookup, "STATUS_ADDR", defaults.status_addr)?,
        };

        let config = Self {
            status_addr,
            udp_addr: parse(&lookup, "UDP_ADDR", defaults.udp_addr)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),

            sync_sleep_interval_ms: parse(&lookup, "SYNC_SLEEP_INTERVAL_MS", defaults.sync_sleep_interval_ms)?,
            sync_worker_count: parse(&lookup, "SYNC_WORKER_COUNT", defaults.sync_worker_count)?,
            sync_queue_capacity: parse(&lookup, "SYNC_QUEUE_CAPACITY", defaults.sync_queue_capacity)?,
            sync_batch_size: parse(&lookup, "SYNC_BATCH_SIZE", defaults.sync_batch_size)?,
            handler_budget_ms: parse(&lookup, "HANDLER_BUDGET_MS", defaults.handler_budget_ms)?,
            command_worker_count: parse(&lookup, "COMMAND_WORKER_COUNT", defaults.command_worker_count)?,

            collision_interval_ms: parse(&lookup, "COLLISION_INTERVAL_MS", defaults.collision_interval_ms)?,
            spatial_cell_size: parse(&lookup, "SPATIAL_CELL_SIZE", defaults.spatial_cell_size)?,
            inbound_packet_rate: parse(&lookup, "INBOUND_PACKET_RATE", defaults.inbound_packet_rate)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("SYNC_WORKER_COUNT", self.sync_worker_count as u64),
            ("SYNC_QUEUE_CAPACITY", self.sync_queue_capacity as u64),
            ("SYNC_BATCH_SIZE", self.sync_batch_size as u64),
            ("COMMAND_WORKER_COUNT", self.command_worker_count as u64),
            ("COLLISION_INTERVAL_MS", self.collision_interval_ms),
            ("INBOUND_PACKET_RATE", self.inbound_packet_rate as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(key, value.to_string()));
            }
        }
        if !(self.spatial_cell_size.is_finite() && self.spatial_cell_size > 0.0) {
            return Err(ConfigError::Invalid(
                "SPATIAL_CELL_SIZE",
                self.spatial_cell_size.to_string(),
            ));
        }
        Ok(())
    }

    /// Queue settings for the movement, camera and key queues
    pub fn sync_queue(&self) -> QueueConfig {
        QueueConfig {
            sleep_interval: Duration::from_millis(self.sync_sleep_interval_ms),
            worker_count: self.sync_worker_count,
            capacity: self.sync_queue_capacity,
            batch_size: self.sync_batch_size,
            handler_budget: Duration::from_millis(self.handler_budget_ms),
        }
    }

    pub fn command_queue(&self) -> QueueConfig {
        QueueConfig {
            worker_count: self.command_worker_count,
            ..self.sync_queue()
        }
    }

    pub fn collision_interval(&self) -> Duration {
        Duration::from_millis(self.collision_interval_ms)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
