//! Server-owned replicated fields
//!
//! A [`SyncVar`] is a value only the server writes. Its change-detection
//! policy decides when clients hear about it, and a change callback fires on
//! both sides with the previous and the new value.

use crate::transport::{decode, encode, FieldMessage};
use crate::{DirtyTracker, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use tickwise_core::{Approx, ChangePolicy, Channel, Tick};
use tracing::trace;

/// Which clients receive a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPermission {
    /// Every observer
    #[default]
    Observers,
    /// Only the owner of the entity
    OwnerOnly,
}

/// Change callback: `(previous, next, as_server)`
pub type OnChange<T> = Box<dyn FnMut(&T, &T, bool) + Send>;

/// A server-authoritative replicated value
pub struct SyncVar<T> {
    value: T,
    tracker: DirtyTracker<T>,
    permission: ReadPermission,
    on_change: Option<OnChange<T>>,
    /// Tick of the newest value applied from the server
    last_remote: Option<Tick>,
}

impl<T: Approx + Clone> SyncVar<T> {
    /// Create a field with an initial value
    pub fn new(initial: T, policy: ChangePolicy) -> Self {
        Self {
            value: initial,
            tracker: DirtyTracker::new(policy),
            permission: ReadPermission::Observers,
            on_change: None,
            last_remote: None,
        }
    }

    /// Restrict who receives the field
    pub fn with_permission(mut self, permission: ReadPermission) -> Self {
        self.permission = permission;
        self
    }

    /// Register the change callback
    pub fn on_change(mut self, callback: impl FnMut(&T, &T, bool) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    /// Current value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Read permission
    pub fn permission(&self) -> ReadPermission {
        self.permission
    }

    /// Write the value on the server
    ///
    /// The callback fires when the value actually differs.
    pub fn set(&mut self, value: T) {
        self.replace(value, true);
    }

    /// Apply a value received from the server
    ///
    /// Values sampled at or before the newest applied tick are ignored.
    pub fn apply_remote(&mut self, tick: Tick, value: T) -> bool {
        if self.last_remote.is_some_and(|t| tick <= t) {
            trace!(tick, "stale field update ignored");
            return false;
        }
        self.last_remote = Some(tick);
        self.replace(value, false);
        true
    }

    /// Decide whether to send the value this tick
    pub fn poll(&mut self, tick: Tick) -> Option<(Channel, FieldMessage<T>)> {
        self.tracker.update(tick, &self.value).map(|transmit| {
            (
                transmit.channel,
                FieldMessage {
                    tick,
                    value: transmit.value,
                },
            )
        })
    }

    /// Resend on the next poll
    pub fn invalidate(&mut self) {
        self.tracker.invalidate();
    }

    fn replace(&mut self, value: T, as_server: bool) {
        if value.approx_eq(&self.value, 0.0) {
            return;
        }
        let previous = std::mem::replace(&mut self.value, value);
        if let Some(callback) = self.on_change.as_mut() {
            callback(&previous, &self.value, as_server);
        }
    }
}

impl<T> std::fmt::Debug for SyncVar<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncVar")
            .field("value", &self.value)
            .field("permission", &self.permission)
            .field("last_remote", &self.last_remote)
            .finish()
    }
}

/// Type-erased view of a [`SyncVar`] held by an entity
pub trait ReplicatedField: Send {
    /// Read permission
    fn permission(&self) -> ReadPermission;

    /// Encoded value to send this tick, if any
    fn poll_encoded(&mut self, tick: Tick) -> Result<Option<(Channel, Vec<u8>)>>;

    /// Decode and apply a received value
    fn apply_encoded(&mut self, payload: &[u8]) -> Result<bool>;

    /// Resend on the next poll
    fn invalidate(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> ReplicatedField for SyncVar<T>
where
    T: Approx + Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn permission(&self) -> ReadPermission {
        self.permission
    }

    fn poll_encoded(&mut self, tick: Tick) -> Result<Option<(Channel, Vec<u8>)>> {
        match self.poll(tick) {
            Some((channel, message)) => Ok(Some((channel, encode(&message)?))),
            None => Ok(None),
        }
    }

    fn apply_encoded(&mut self, payload: &[u8]) -> Result<bool> {
        let message: FieldMessage<T> = decode(payload)?;
        Ok(self.apply_remote(message.tick, message.value))
    }

    fn invalidate(&mut self) {
        SyncVar::invalidate(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(u8, u8, bool)>>>;

    fn color(log: &Log) -> SyncVar<u8> {
        let log = Arc::clone(log);
        SyncVar::new(0u8, ChangePolicy::unreliable(3, 1))
            .on_change(move |prev, next, as_server| log.lock().unwrap().push((*prev, *next, as_server)))
    }

    #[test]
    fn test_set_fires_callback_on_change() {
        let log = Log::default();
        let mut field = color(&log);

        field.set(2);
        field.set(2);
        field.set(5);

        assert_eq!(*log.lock().unwrap(), vec![(0, 2, true), (2, 5, true)]);
        assert_eq!(*field.get(), 5);
    }

    #[test]
    fn test_poll_respects_interval() {
        let log = Log::default();
        let mut field = color(&log);

        assert!(field.poll(0).is_some());
        field.set(1);
        assert!(field.poll(1).is_none());
        assert!(field.poll(2).is_none());
        let (channel, message) = field.poll(3).unwrap();
        assert_eq!(channel, Channel::Unreliable);
        assert_eq!(message.value, 1);
    }

    #[test]
    fn test_remote_updates_monotonic() {
        let log = Log::default();
        let mut field = color(&log);

        assert!(field.apply_remote(10, 3));
        assert!(!field.apply_remote(9, 7));
        assert!(!field.apply_remote(10, 7));
        assert_eq!(*field.get(), 3);
        assert_eq!(*log.lock().unwrap(), vec![(0, 3, false)]);
    }

    #[test]
    fn test_encoded_round_trip_through_trait() {
        let server_log = Log::default();
        let client_log = Log::default();
        let mut server: Box<dyn ReplicatedField> = Box::new(color(&server_log).with_permission(ReadPermission::OwnerOnly));
        let mut client = color(&client_log);

        server
            .as_any_mut()
            .downcast_mut::<SyncVar<u8>>()
            .unwrap()
            .set(4);
        let (_, payload) = server.poll_encoded(7).unwrap().unwrap();

        assert!(client.apply_encoded(&payload).unwrap());
        assert_eq!(*client.get(), 4);
        assert_eq!(server.permission(), ReadPermission::OwnerOnly);
        assert!(client.apply_encoded(&[1]).is_err());
    }
}
