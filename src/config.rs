//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use serde_derive::Deserialize;
use std::env;
use std::fmt::Debug;
use std::result::Result;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::backoff::BackoffConfig;
use crate::error::{ia_err, ia_error, TunnelError};

/// Tuning options for the channel actors of a tunnel worker.
///
/// All options have working defaults; most applications only construct this
/// with [`TunnelWorkerConfig::new()`] followed by
/// [`from_environment()`](TunnelWorkerConfig::from_environment()).
///
/// Each setter validates its argument and returns the updated config, so
/// calls can be chained with `?`:
///```
/// # use tablestore_tunnel_sdk::TunnelWorkerConfig;
/// # use std::time::Duration;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TunnelWorkerConfig::new()
///     .checkpoint_interval(Duration::from_secs(5))?
///     .backoff_max_delay(Duration::from_millis(500))?
///     .channel_buffer_size(4)?;
/// assert_eq!(config.channel_buffer_size, 4);
/// # Ok(())
/// # }
///```
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelWorkerConfig {
    /// Capacity of the queue between a channel's reader and consumer.
    pub channel_buffer_size: usize,
    /// How often the checkpointer writes the newest progress token.
    pub checkpoint_interval: Duration,
    /// Delay policy between reads of a stream channel.
    pub backoff: BackoffConfig,
    /// A read returning at least this many records resets the backoff.
    pub full_batch_record_count: usize,
    /// A read returning at least this many bytes resets the backoff.
    pub full_batch_byte_size: usize,
}

pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1;
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FULL_BATCH_RECORD_COUNT: usize = 500;
pub const DEFAULT_FULL_BATCH_BYTE_SIZE: usize = 900 * 1024;

impl Default for TunnelWorkerConfig {
    fn default() -> Self {
        TunnelWorkerConfig {
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            backoff: BackoffConfig::default(),
            full_batch_record_count: DEFAULT_FULL_BATCH_RECORD_COUNT,
            full_batch_byte_size: DEFAULT_FULL_BATCH_BYTE_SIZE,
        }
    }
}

// Layout of a JSON config file. Durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    channel_buffer_size: Option<usize>,
    checkpoint_interval_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    backoff_max_elapsed_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    backoff_jitter: Option<f64>,
    full_batch_records: Option<usize>,
    full_batch_bytes: Option<usize>,
}

impl TunnelWorkerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        TunnelWorkerConfig {
            ..Default::default()
        }
    }

    /// Gather configuration settings from the current environment.
    ///
    /// Recognized variables:
    /// - `TABLESTORE_TUNNEL_CHANNEL_BUFFER_SIZE`
    /// - `TABLESTORE_TUNNEL_CHECKPOINT_INTERVAL_MS`
    /// - `TABLESTORE_TUNNEL_BACKOFF_BASE_MS`
    /// - `TABLESTORE_TUNNEL_BACKOFF_MAX_MS`
    /// - `TABLESTORE_TUNNEL_BACKOFF_MAX_ELAPSED_MS`
    /// - `TABLESTORE_TUNNEL_BACKOFF_MULTIPLIER`
    /// - `TABLESTORE_TUNNEL_BACKOFF_JITTER`
    /// - `TABLESTORE_TUNNEL_FULL_BATCH_RECORDS`
    /// - `TABLESTORE_TUNNEL_FULL_BATCH_BYTES`
    ///
    /// Values can be overridden in code by calling setters afterwards.
    pub fn from_environment(mut self) -> Result<Self, TunnelError> {
        if let Some(v) = env_value::<usize>("TABLESTORE_TUNNEL_CHANNEL_BUFFER_SIZE")? {
            self = self.channel_buffer_size(v)?;
        }
        if let Some(v) = env_value::<u64>("TABLESTORE_TUNNEL_CHECKPOINT_INTERVAL_MS")? {
            self = self.checkpoint_interval(Duration::from_millis(v))?;
        }
        if let Some(v) = env_value::<u64>("TABLESTORE_TUNNEL_BACKOFF_BASE_MS")? {
            self.backoff.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<u64>("TABLESTORE_TUNNEL_BACKOFF_MAX_MS")? {
            self.backoff.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<u64>("TABLESTORE_TUNNEL_BACKOFF_MAX_ELAPSED_MS")? {
            self.backoff.max_elapsed = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<f64>("TABLESTORE_TUNNEL_BACKOFF_MULTIPLIER")? {
            self.backoff.multiplier = v;
        }
        if let Some(v) = env_value::<f64>("TABLESTORE_TUNNEL_BACKOFF_JITTER")? {
            self.backoff.jitter = v;
        }
        if let Some(v) = env_value::<usize>("TABLESTORE_TUNNEL_FULL_BATCH_RECORDS")? {
            self.full_batch_record_count = v;
        }
        if let Some(v) = env_value::<usize>("TABLESTORE_TUNNEL_FULL_BATCH_BYTES")? {
            self.full_batch_byte_size = v;
        }
        self.validate()?;
        debug!("tunnel worker config from environment: {:?}", self);
        Ok(self)
    }

    /// Read settings from a JSON file. Absent keys keep their current value.
    ///
    /// Example file:
    ///```json
    /// {
    ///   "checkpoint_interval_ms": 5000,
    ///   "backoff_base_ms": 50,
    ///   "backoff_max_ms": 2000,
    ///   "channel_buffer_size": 2
    /// }
    ///```
    pub fn from_json_file(self, filename: &str) -> Result<Self, TunnelError> {
        let data = std::fs::read_to_string(filename)
            .map_err(|e| ia_error!("error reading config file '{}': {}", filename, e))?;
        self.from_json_str(&data)
    }

    /// Same as [`from_json_file()`](TunnelWorkerConfig::from_json_file()), from a string.
    pub fn from_json_str(mut self, data: &str) -> Result<Self, TunnelError> {
        let f: ConfigFile = serde_json::from_str(data)?;
        if let Some(v) = f.channel_buffer_size {
            self.channel_buffer_size = v;
        }
        if let Some(v) = f.checkpoint_interval_ms {
            self.checkpoint_interval = Duration::from_millis(v);
        }
        if let Some(v) = f.backoff_base_ms {
            self.backoff.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = f.backoff_max_ms {
            self.backoff.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = f.backoff_max_elapsed_ms {
            self.backoff.max_elapsed = Duration::from_millis(v);
        }
        if let Some(v) = f.backoff_multiplier {
            self.backoff.multiplier = v;
        }
        if let Some(v) = f.backoff_jitter {
            self.backoff.jitter = v;
        }
        if let Some(v) = f.full_batch_records {
            self.full_batch_record_count = v;
        }
        if let Some(v) = f.full_batch_bytes {
            self.full_batch_byte_size = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Set the capacity of the reader-to-consumer queue. Must be at least 1.
    pub fn channel_buffer_size(mut self, size: usize) -> Result<Self, TunnelError> {
        if size == 0 {
            return ia_err!("channel buffer size must be at least 1");
        }
        self.channel_buffer_size = size;
        Ok(self)
    }

    /// Set the checkpoint flush interval. Must be non-zero.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Result<Self, TunnelError> {
        if interval.is_zero() {
            return ia_err!("checkpoint interval must be greater than zero");
        }
        self.checkpoint_interval = interval;
        Ok(self)
    }

    /// Replace the whole backoff policy.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Result<Self, TunnelError> {
        backoff.validate()?;
        self.backoff = backoff;
        Ok(self)
    }

    pub fn backoff_base_delay(mut self, delay: Duration) -> Result<Self, TunnelError> {
        let mut b = self.backoff.clone();
        b.base_delay = delay;
        b.validate()?;
        self.backoff = b;
        Ok(self)
    }

    pub fn backoff_max_delay(mut self, delay: Duration) -> Result<Self, TunnelError> {
        let mut b = self.backoff.clone();
        b.max_delay = delay;
        b.validate()?;
        self.backoff = b;
        Ok(self)
    }

    /// Stop producing delays after this much time since the last reset.
    /// Zero disables the limit.
    pub fn backoff_max_elapsed(mut self, elapsed: Duration) -> Result<Self, TunnelError> {
        self.backoff.max_elapsed = elapsed;
        Ok(self)
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Result<Self, TunnelError> {
        let mut b = self.backoff.clone();
        b.multiplier = multiplier;
        b.validate()?;
        self.backoff = b;
        Ok(self)
    }

    pub fn backoff_jitter(mut self, jitter: f64) -> Result<Self, TunnelError> {
        let mut b = self.backoff.clone();
        b.jitter = jitter;
        b.validate()?;
        self.backoff = b;
        Ok(self)
    }

    /// Set the thresholds above which a read counts as a full batch.
    pub fn full_batch_thresholds(
        mut self,
        record_count: usize,
        byte_size: usize,
    ) -> Result<Self, TunnelError> {
        if record_count == 0 || byte_size == 0 {
            return ia_err!("full batch thresholds must be greater than zero");
        }
        self.full_batch_record_count = record_count;
        self.full_batch_byte_size = byte_size;
        Ok(self)
    }

    /// Check all settings for consistency.
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.channel_buffer_size == 0 {
            return ia_err!("channel buffer size must be at least 1");
        }
        if self.checkpoint_interval.is_zero() {
            return ia_err!("checkpoint interval must be greater than zero");
        }
        if self.full_batch_record_count == 0 || self.full_batch_byte_size == 0 {
            return ia_err!("full batch thresholds must be greater than zero");
        }
        self.backoff.validate()
    }

    pub(crate) fn is_full_batch(&self, record_count: usize, byte_size: usize) -> bool {
        record_count >= self.full_batch_record_count || byte_size >= self.full_batch_byte_size
    }
}

fn env_value<T>(name: &str) -> Result<Option<T>, TunnelError>
where
    T: FromStr,
    T::Err: Debug,
{
    match env::var(name) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(e) => ia_err!("invalid value '{}' for {}: {:?}", val, name, e),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error;
    use std::io::Write;

    #[test]
    fn defaults() {
        let c = TunnelWorkerConfig::new();
        assert_eq!(c.channel_buffer_size, 1);
        assert_eq!(c.checkpoint_interval, Duration::from_secs(10));
        assert_eq!(c.backoff.base_delay, Duration::from_millis(20));
        assert_eq!(c.backoff.max_delay, Duration::from_secs(1));
        assert_eq!(c.full_batch_record_count, 500);
        assert_eq!(c.full_batch_byte_size, 900 * 1024);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn setters_validate() {
        assert!(TunnelWorkerConfig::new().channel_buffer_size(0).is_err());
        assert!(TunnelWorkerConfig::new()
            .checkpoint_interval(Duration::ZERO)
            .is_err());
        assert!(TunnelWorkerConfig::new().backoff_multiplier(0.5).is_err());
        assert!(TunnelWorkerConfig::new().backoff_jitter(1.0).is_err());
        // base above the default 1s max
        assert!(TunnelWorkerConfig::new()
            .backoff_base_delay(Duration::from_secs(2))
            .is_err());
        assert!(TunnelWorkerConfig::new().full_batch_thresholds(0, 10).is_err());
    }

    #[test]
    fn full_batch() {
        let c = TunnelWorkerConfig::new().full_batch_thresholds(10, 100).unwrap();
        assert!(c.is_full_batch(10, 0));
        assert!(c.is_full_batch(1, 100));
        assert!(!c.is_full_batch(9, 99));
    }

    #[test]
    fn json_file() -> Result<(), Box<dyn Error>> {
        let mut f = tempfile::NamedTempFile::new()?;
        write!(
            f,
            r#"{{"checkpoint_interval_ms": 2500, "backoff_base_ms": 5, "backoff_max_ms": 40,
                "backoff_jitter": 0.0, "full_batch_records": 7}}"#
        )?;
        let path = f.path().to_string_lossy().to_string();
        let c = TunnelWorkerConfig::new().from_json_file(&path)?;
        assert_eq!(c.checkpoint_interval, Duration::from_millis(2500));
        assert_eq!(c.backoff.base_delay, Duration::from_millis(5));
        assert_eq!(c.backoff.max_delay, Duration::from_millis(40));
        assert_eq!(c.backoff.jitter, 0.0);
        assert_eq!(c.full_batch_record_count, 7);
        // untouched
        assert_eq!(c.channel_buffer_size, 1);
        Ok(())
    }

    #[test]
    fn json_rejects_bad_input() {
        assert!(TunnelWorkerConfig::new()
            .from_json_str(r#"{"no_such_option": 1}"#)
            .is_err());
        assert!(TunnelWorkerConfig::new()
            .from_json_str(r#"{"backoff_multiplier": 0.2}"#)
            .is_err());
        assert!(TunnelWorkerConfig::new()
            .from_json_file("/nonexistent/tunnel.json")
            .is_err());
    }

    #[test]
    fn environment() -> Result<(), Box<dyn Error>> {
        env::set_var("TABLESTORE_TUNNEL_CHANNEL_BUFFER_SIZE", "3");
        env::set_var("TABLESTORE_TUNNEL_BACKOFF_MULTIPLIER", "2.0");
        let c = TunnelWorkerConfig::new().from_environment()?;
        assert_eq!(c.channel_buffer_size, 3);
        assert_eq!(c.backoff.multiplier, 2.0);

        env::set_var("TABLESTORE_TUNNEL_CHANNEL_BUFFER_SIZE", "lots");
        assert!(TunnelWorkerConfig::new().from_environment().is_err());
        env::remove_var("TABLESTORE_TUNNEL_CHANNEL_BUFFER_SIZE");
        env::remove_var("TABLESTORE_TUNNEL_BACKOFF_MULTIPLIER");
        Ok(())
    }
}
