//! Handle and registry configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the debounce window.
const MAX_FLUSH_DELAY: Duration = Duration::from_secs(60);

/// Options accepted by [`SeqLog::open`](crate::SeqLog::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Debounce window between the first unflushed push and the durable write.
    /// Default: 200ms
    #[serde(default = "default_flush_delay", with = "duration_ms")]
    pub flush_delay: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            flush_delay: default_flush_delay(),
        }
    }
}

fn default_flush_delay() -> Duration {
    Duration::from_millis(200)
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_delay > MAX_FLUSH_DELAY {
            return Err(Error::InvalidArgument(format!(
                "flush_delay must be at most {}s",
                MAX_FLUSH_DELAY.as_secs()
            )));
        }
        Ok(())
    }
}

/// Configuration of a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capacity of the event broadcast channel. Slow subscribers that fall
    /// further behind than this miss events.
    /// Default: 1024
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl RegistryConfig {
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidArgument(
                "event_channel_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
