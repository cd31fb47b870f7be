//! Change-detection transmitter
//!
//! Decides, once per tick, whether a replicated value is worth sending.
//! A value is sent when it changed by more than the policy's epsilon and the
//! send interval has elapsed. After a change the same value is repeated a
//! bounded number of times so one lost unreliable datagram does not lose the
//! change; then the value goes quiet until it changes again (or a keyframe
//! comes due).

use tickwise_core::{Approx, ChangePolicy, Channel, Tick};

/// Why a value was transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReason {
    /// The value changed beyond the epsilon
    Changed,
    /// Repeat of an unchanged value for loss tolerance
    Redundant,
    /// Periodic resend of a quiet value
    Keyframe,
}

/// A transmission decided by [`DirtyTracker::update`]
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit<T> {
    pub value: T,
    pub channel: Channel,
    pub reason: SendReason,
}

/// Per-field transmission state
#[derive(Debug, Clone)]
pub struct DirtyTracker<T> {
    policy: ChangePolicy,
    /// Baseline for change detection: the last value sent as a change
    baseline: Option<T>,
    /// Tick of the most recent send of any kind
    last_send: Option<Tick>,
    /// Repeats still owed for the baseline
    repeats_left: u32,
    /// Total transmissions
    sent: u64,
}

impl<T: Approx + Clone> DirtyTracker<T> {
    /// Create a tracker that sends the first value it sees
    pub fn new(policy: ChangePolicy) -> Self {
        Self {
            policy,
            baseline: None,
            last_send: None,
            repeats_left: 0,
            sent: 0,
        }
    }

    /// The policy in use
    pub fn policy(&self) -> &ChangePolicy {
        &self.policy
    }

    /// Feed the value of this tick; returns what to send, if anything
    pub fn update(&mut self, tick: Tick, value: &T) -> Option<Transmit<T>> {
        let changed = self
            .baseline
            .as_ref()
            .map_or(true, |prev| value.differs(prev, self.policy.epsilon));
        let interval_due = self
            .last_send
            .map_or(true, |last| tick >= last + self.policy.interval_ticks);

        if !interval_due {
            // Rate limited; a pending change is picked up on a later tick
            return None;
        }

        let reason = if changed {
            self.baseline = Some(value.clone());
            self.repeats_left = self.policy.effective_redundancy() - 1;
            SendReason::Changed
        } else if self.repeats_left > 0 {
            self.repeats_left -= 1;
            SendReason::Redundant
        } else if self.keyframe_due(tick) {
            SendReason::Keyframe
        } else {
            return None;
        };

        self.last_send = Some(tick);
        self.sent += 1;
        Some(Transmit {
            value: value.clone(),
            channel: self.policy.channel,
            reason,
        })
    }

    /// Forget the baseline so the next value is sent as a change
    ///
    /// Used when a new observer joins or ownership moves.
    pub fn invalidate(&mut self) {
        self.baseline = None;
        self.last_send = None;
        self.repeats_left = 0;
    }

    /// Total number of transmissions so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn keyframe_due(&self, tick: Tick) -> bool {
        match (self.policy.keyframe_interval, self.last_send) {
            (Some(every), Some(last)) => tick >= last + every,
            _ => false,
        }
    }
}
