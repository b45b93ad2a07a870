//! Boundary to the concrete string transport.
//!
//! Nothing above this module knows how text reaches the surface. The
//! session only holds a weak handle, so a torn-down transport is observed as
//! "detached" instead of being kept alive.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use thiserror::Error;

use crate::error::{BridgeError, Result};

/// Called with every raw inbound string.
pub type ReceiveHandler = Arc<dyn Fn(String) + Send + Sync>;

/// A transport refused an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        BridgeError::Transport(err.0)
    }
}

/// A postMessage-style string pipe to one surface.
pub trait TransportChannel: Send + Sync {
    fn send(&self, text: &str) -> std::result::Result<(), TransportError>;

    /// Install the handler for inbound text, replacing any previous one.
    fn register_receive_handler(&self, handler: ReceiveHandler);
}

/// Weak, possibly detached reference to a [`TransportChannel`].
#[derive(Default)]
pub struct ChannelHandle {
    channel: RwLock<Option<Weak<dyn TransportChannel>>>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl ChannelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: &Arc<dyn TransportChannel>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(channel));
    }

    pub fn detach(&self) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// True while attached and the transport is still alive.
    pub fn is_attached(&self) -> bool {
        self.upgrade().is_some()
    }

    fn upgrade(&self) -> Option<Arc<dyn TransportChannel>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Send text, failing if detached or refused.
    pub fn send(&self, text: &str) -> Result<()> {
        let channel = self
            .upgrade()
            .ok_or_else(|| BridgeError::Transport("channel is detached".to_string()))?;
        channel.send(text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LoopbackChannel {
        sent: Mutex<Vec<String>>,
        handler: Mutex<Option<ReceiveHandler>>,
        refuse: bool,
    }

    impl TransportChannel for LoopbackChannel {
        fn send(&self, text: &str) -> std::result::Result<(), TransportError> {
            if self.refuse {
                return Err(TransportError::new("surface gone"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn register_receive_handler(&self, handler: ReceiveHandler) {
            *self.handler.lock().unwrap() = Some(handler);
        }
    }

    #[test]
    fn test_send_when_attached() {
        let loopback = Arc::new(LoopbackChannel::default());
        let channel: Arc<dyn TransportChannel> = loopback.clone();
        let handle = ChannelHandle::new();
        handle.attach(&channel);

        handle.send("hello").unwrap();
        assert!(handle.is_attached());
        assert_eq!(*loopback.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_send_when_detached() {
        let handle = ChannelHandle::new();
        let err = handle.send("hello").unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[test]
    fn test_dropped_transport_counts_as_detached() {
        let channel: Arc<dyn TransportChannel> = Arc::new(LoopbackChannel::default());
        let handle = ChannelHandle::new();
        handle.attach(&channel);
        drop(channel);

        assert!(!handle.is_attached());
        assert!(handle.send("x").is_err());
    }

    #[test]
    fn test_refused_send_maps_to_transport_error() {
        let channel: Arc<dyn TransportChannel> = Arc::new(LoopbackChannel {
            refuse: true,
            ..Default::default()
        });
        let handle = ChannelHandle::new();
        handle.attach(&channel);

        let err = handle.send("x").unwrap_err();
        assert_eq!(err.to_string(), "Transport failure: surface gone");
    }

    #[test]
    fn test_detach() {
        let channel: Arc<dyn TransportChannel> = Arc::new(LoopbackChannel::default());
        let handle = ChannelHandle::new();
        handle.attach(&channel);
        handle.detach();
        assert!(!handle.is_attached());
    }
}
