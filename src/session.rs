//! One conversation with one surface.
//!
//! A [`Session`] turns raw inbound text into typed messages for its handler,
//! keeps track of requests still owed a response, and routes responses back
//! out through its channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::channel::{ChannelHandle, ReceiveHandler, TransportChannel};
use crate::error::{BridgeError, Result, SessionError};
use crate::protocol::correlator::OutboundSink;
use crate::protocol::envelope::{DecodeError, OutboundEnvelope, decode_inbound, encode};
use crate::protocol::message::Respondable;
use crate::protocol::registry::{DispatchError, Dispatched, MethodRegistry};

/// Receives decoded messages and session-level failures.
pub trait SessionHandler<M>: Send + Sync {
    fn handle_message(&self, message: M);

    fn on_error(&self, error: SessionError) {
        log::warn!("Session error: {}", error);
    }
}

impl<M, F> SessionHandler<M> for F
where
    F: Fn(M) + Send + Sync,
{
    fn handle_message(&self, message: M) {
        self(message)
    }
}

/// What happened to one piece of inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Decoded and handed to the handler.
    Delivered,
    /// Not a valid envelope.
    Malformed(DecodeError),
    /// A valid envelope the registry would not turn into a message.
    Rejected(DispatchError),
}

impl DispatchStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchStatus::Delivered)
    }
}

/// Outbound half: encodes envelopes and pushes them down the channel.
struct Link<M> {
    channel: ChannelHandle,
    handler: RwLock<Arc<dyn SessionHandler<M>>>,
}

impl<M> Link<M> {
    fn handler(&self) -> Arc<dyn SessionHandler<M>> {
        Arc::clone(&self.handler.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<M> OutboundSink for Link<M> {
    fn send_envelope(&self, envelope: OutboundEnvelope) {
        let text = match encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode response for request {}: {}", envelope.id, e);
                return;
            }
        };
        if let Err(e) = self.channel.send(&text) {
            log::warn!("Failed to send response for request {}: {}", envelope.id, e);
            self.handler().on_error(SessionError::sending_failed(e.to_string()));
        }
    }
}

struct SessionInner<M> {
    registry: Arc<MethodRegistry<M>>,
    link: Arc<Link<M>>,
    pending: Mutex<HashMap<String, Arc<dyn Respondable>>>,
}

/// Registry, channel, handler, and the requests still pending on one
/// surface.
pub struct Session<M> {
    inner: Arc<SessionInner<M>>,
}

impl<M> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("attached", &self.is_attached())
            .field("methods", &self.inner.registry.len())
            .finish()
    }
}

impl<M> Session<M> {
    pub fn detach(&self) {
        self.inner.link.channel.detach();
        log::debug!("Session detached from channel");
    }

    pub fn is_attached(&self) -> bool {
        self.inner.link.channel.is_attached()
    }
}

impl<M: 'static> Session<M> {
    pub fn new(registry: Arc<MethodRegistry<M>>, handler: Arc<dyn SessionHandler<M>>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                registry,
                link: Arc::new(Link {
                    channel: ChannelHandle::new(),
                    handler: RwLock::new(handler),
                }),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bind to a transport and start receiving from it.
    ///
    /// The transport only holds a weak reference back, so dropping every
    /// clone of the session stops delivery.
    pub fn attach(&self, channel: &Arc<dyn TransportChannel>) {
        self.inner.link.channel.attach(channel);
        let weak = Arc::downgrade(&self.inner);
        let handler: ReceiveHandler = Arc::new(move |raw: String| match weak.upgrade() {
            Some(inner) => {
                Session { inner }.dispatch(&raw);
            }
            None => log::debug!("Session gone, dropping inbound message"),
        });
        channel.register_receive_handler(handler);
        log::debug!("Session attached to channel");
    }

    pub fn registry(&self) -> &Arc<MethodRegistry<M>> {
        &self.inner.registry
    }

    pub fn set_handler(&self, handler: Arc<dyn SessionHandler<M>>) {
        *self.inner.link.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Decode one inbound message and hand it to the handler.
    ///
    /// Malformed or rejected input is logged and dropped; it never reaches
    /// the handler and never produces a response.
    pub fn dispatch(&self, raw: &str) -> DispatchStatus {
        let envelope = match decode_inbound(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping malformed message: {}", e);
                return DispatchStatus::Malformed(e);
            }
        };

        let sink: Arc<dyn OutboundSink> = self.inner.link.clone();
        match self.inner.registry.try_dispatch(&envelope, &sink) {
            Ok(Dispatched { message, reply }) => {
                if let Some(reply) = reply {
                    self.track(reply);
                }
                log::debug!("Delivering {}", envelope.method);
                self.inner.link.handler().handle_message(message);
                DispatchStatus::Delivered
            }
            Err(e) => {
                log::warn!("Dropping message: {}", e);
                DispatchStatus::Rejected(e)
            }
        }
    }

    fn track(&self, reply: Arc<dyn Respondable>) {
        let Some(id) = reply.id().map(str::to_string) else {
            return;
        };
        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, r| !r.is_answered());
        if pending.insert(id.clone(), reply).is_some() {
            log::warn!("Request id {} reused while still pending", id);
        }
    }

    /// Answer a pending request by id with raw JSON.
    pub fn respond_raw(&self, id: &str, raw: &str) -> Result<()> {
        let reply = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownRequest(id.to_string()))?;

        reply.respond_with_raw(raw)?;

        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if reply.is_answered() {
            pending.remove(id);
        }
        Ok(())
    }

    /// Forward a failure the host observed (e.g. the renderer died).
    pub fn report_error(&self, error: SessionError) {
        self.inner.link.handler().on_error(error);
    }

    /// Requests still owed a response.
    pub fn pending_count(&self) -> usize {
        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, r| !r.is_answered());
        pending.len()
    }

    /// Cancel every unanswered request, then detach.
    ///
    /// Returns how many requests were cancelled.
    pub fn teardown(&self) -> usize {
        let drained: Vec<Arc<dyn Respondable>> = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, reply)| reply)
            .collect();

        let mut cancelled = 0;
        for reply in drained {
            if !reply.is_answered() {
                reply.cancel();
                cancelled += 1;
            }
        }
        self.detach();
        log::info!("Session torn down, cancelled {} pending request(s)", cancelled);
        cancelled
    }
}
