//! Session configuration - tick rate, retention horizon and send policies
//!
//! Every tunable of the netcode is exposed here rather than hardcoded; values
//! are deployment-specific (latency budget, bandwidth budget, loss rate).
//! A configuration can be built in code or loaded from RON.
//!
//! ```
//! use tickwise_core::{Channel, NetConfig};
//!
//! let config = NetConfig::from_ron_str(
//!     "(tick_rate_hz: 60, retention_horizon: 32, snapshot: (redundancy: 2, channel: Unreliable))",
//! )
//! .unwrap();
//! assert_eq!(config.tick_rate_hz, 60);
//! assert_eq!(config.snapshot.redundancy, 2);
//! assert_eq!(config.snapshot.channel, Channel::Unreliable);
//! ```

use crate::{Error, Result, TickRate};
use serde::{Deserialize, Serialize};

/// Delivery class of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channel {
    /// Guaranteed, ordered delivery (ownership changes, RPCs)
    Reliable,
    /// Best effort, low latency (inputs, snapshots)
    #[default]
    Unreliable,
}

/// Per-field transmission policy for change detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangePolicy {
    /// Minimum ticks between two sends of this field
    ///
    /// `1` sends a change on the tick it happens.
    pub interval_ticks: u64,
    /// Changes at or below this magnitude are not worth sending
    pub epsilon: f32,
    /// Total number of times an unchanged value is sent (first send included)
    ///
    /// Repeats tolerate loss on the unreliable channel without acks. Forced
    /// to 1 on the reliable channel.
    pub redundancy: u32,
    /// Send the current value every N ticks even when nothing changed
    pub keyframe_interval: Option<u64>,
    /// Delivery class
    pub channel: Channel,
}

impl ChangePolicy {
    /// Policy for a field sent over the reliable channel
    pub fn reliable(interval_ticks: u64) -> Self {
        Self {
            interval_ticks,
            redundancy: 1,
            channel: Channel::Reliable,
            ..Self::default()
        }
    }

    /// Policy for a field sent over the unreliable channel with repeats
    pub fn unreliable(interval_ticks: u64, redundancy: u32) -> Self {
        Self {
            interval_ticks,
            redundancy,
            channel: Channel::Unreliable,
            ..Self::default()
        }
    }

    /// Set the change threshold
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set a periodic keyframe
    pub fn with_keyframe(mut self, every: u64) -> Self {
        self.keyframe_interval = Some(every);
        self
    }

    /// Number of sends per distinct value after channel rules are applied
    pub fn effective_redundancy(&self) -> u32 {
        match self.channel {
            Channel::Reliable => 1,
            Channel::Unreliable => self.redundancy.max(1),
        }
    }

    /// Check the policy for values that would stall or flood transmission
    pub fn validate(&self) -> Result<()> {
        if self.interval_ticks == 0 {
            return Err(Error::InvalidConfig("interval_ticks must be at least 1".into()));
        }
        if self.redundancy == 0 {
            return Err(Error::InvalidConfig("redundancy must be at least 1".into()));
        }
        if self.epsilon.is_nan() || self.epsilon < 0.0 {
            return Err(Error::InvalidConfig("epsilon must be non-negative".into()));
        }
        if self.keyframe_interval == Some(0) {
            return Err(Error::InvalidConfig("keyframe_interval must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self {
            interval_ticks: 1,
            epsilon: 0.0,
            redundancy: 3,
            keyframe_interval: None,
            channel: Channel::Unreliable,
        }
    }
}

/// Configuration for one netcode session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Fixed simulation rate
    pub tick_rate_hz: u32,
    /// Upper bound on catch-up ticks run within a single frame
    pub max_ticks_per_frame: u32,
    /// Ticks of input/state history kept for replay
    ///
    /// Must cover the worst expected round trip plus jitter. Snapshots older
    /// than this relative to the present force a hard reset.
    pub retention_horizon: usize,
    /// Number of most recent inputs carried by each input message
    pub input_redundancy: usize,
    /// Transmission policy of reconciliation snapshots
    pub snapshot: ChangePolicy,
    /// Divergence tolerated between predicted and authoritative snapshots
    pub determinism_epsilon: f32,
    /// Ticks a client keeps ahead of the newest snapshot it received
    ///
    /// Must exceed the one-way latency in ticks, or the server simulates
    /// before the owner's input arrives and falls back to the default.
    pub input_lead: u64,
}

impl NetConfig {
    /// Parse a configuration from RON text and validate it
    ///
    /// Missing fields take their default values.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: NetConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty RON
    pub fn to_ron_string(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Check every field for usable values
    pub fn validate(&self) -> Result<()> {
        TickRate::new(self.tick_rate_hz)?;
        if self.retention_horizon == 0 {
            return Err(Error::InvalidConfig("retention_horizon must be at least 1".into()));
        }
        if self.input_redundancy == 0 {
            return Err(Error::InvalidConfig("input_redundancy must be at least 1".into()));
        }
        if self.input_lead >= self.retention_horizon as u64 {
            return Err(Error::InvalidConfig("input_lead must be below retention_horizon".into()));
        }
        if self.max_ticks_per_frame == 0 {
            return Err(Error::InvalidConfig("max_ticks_per_frame must be at least 1".into()));
        }
        self.snapshot.validate()
    }

    /// The configured tick rate
    pub fn tick_rate(&self) -> Result<TickRate> {
        TickRate::new(self.tick_rate_hz)
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            max_ticks_per_frame: 5,
            retention_horizon: 64,
            input_redundancy: 3,
            // Resend a resting state once a second so a lost correction heals
            snapshot: ChangePolicy::default().with_keyframe(30),
            determinism_epsilon: 1e-4,
            input_lead: 0,
        }
    }
}
