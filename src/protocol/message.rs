//! Typed inbound messages.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::correlator::{OutboundSink, Responder, ResponsePayload, ResponseSource};

/// Anything a session can hold on to while a response is owed.
///
/// Lets code that does not know the payload types answer or cancel a
/// message, e.g. a language binding handing back raw JSON.
pub trait Respondable: Send + Sync {
    /// Correlation id, `None` for notifications.
    fn id(&self) -> Option<&str>;
    fn method(&self) -> &str;
    fn is_answered(&self) -> bool;
    fn respond_with_raw(&self, raw: &str) -> Result<()>;
    fn cancel(&self);
}

impl<R: ResponsePayload> Respondable for Responder<R> {
    fn id(&self) -> Option<&str> {
        Some(Responder::id(self))
    }

    fn method(&self) -> &str {
        Responder::method(self)
    }

    fn is_answered(&self) -> bool {
        Responder::is_answered(self)
    }

    fn respond_with_raw(&self, raw: &str) -> Result<()> {
        Responder::respond_with_raw(self, raw)
    }

    fn cancel(&self) {
        Responder::cancel(self)
    }
}

/// An inbound message that expects exactly one response of type `R`.
pub struct Request<P, R> {
    params: P,
    responder: Responder<R>,
}

impl<P, R: ResponsePayload> Request<P, R> {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: P,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            params,
            responder: Responder::new(id, method, sink),
        }
    }

    pub fn respond_with(&self, value: R) {
        self.responder.respond_with(value)
    }

    pub fn respond_with_source(&self, source: ResponseSource<R>) {
        self.responder.respond_with_source(source)
    }

    pub fn respond_with_raw(&self, raw: &str) -> Result<()> {
        self.responder.respond_with_raw(raw)
    }
}

impl<P, R> Request<P, R> {
    pub fn id(&self) -> &str {
        self.responder.id()
    }

    pub fn method(&self) -> &str {
        self.responder.method()
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    /// A handle that answers this request, sharing its correlation state.
    pub fn responder(&self) -> Responder<R> {
        self.responder.clone()
    }

    pub fn is_answered(&self) -> bool {
        self.responder.is_answered()
    }

    pub fn cancel(&self) {
        self.responder.cancel()
    }
}

impl<P: Clone, R> Clone for Request<P, R> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            responder: self.responder.clone(),
        }
    }
}

impl<P: fmt::Debug, R> fmt::Debug for Request<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id())
            .field("method", &self.method())
            .field("params", &self.params)
            .field("answered", &self.is_answered())
            .finish()
    }
}

impl<P: Send + Sync, R: ResponsePayload> Respondable for Request<P, R> {
    fn id(&self) -> Option<&str> {
        Some(Request::id(self))
    }

    fn method(&self) -> &str {
        Request::method(self)
    }

    fn is_answered(&self) -> bool {
        Request::is_answered(self)
    }

    fn respond_with_raw(&self, raw: &str) -> Result<()> {
        Request::respond_with_raw(self, raw)
    }

    fn cancel(&self) {
        Request::cancel(self)
    }
}

/// A fire-and-forget inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<P> {
    method: String,
    params: P,
}

impl<P> Notification<P> {
    pub fn new(method: impl Into<String>, params: P) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn into_params(self) -> P {
        self.params
    }
}

/// Notifications owe nothing, so they always count as answered and every
/// response attempt is dropped.
impl<P: Send + Sync> Respondable for Notification<P> {
    fn id(&self) -> Option<&str> {
        None
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn is_answered(&self) -> bool {
        true
    }

    fn respond_with_raw(&self, _raw: &str) -> Result<()> {
        log::warn!("Ignoring response to notification {}", self.method);
        Ok(())
    }

    fn cancel(&self) {
        log::warn!("Ignoring cancel of notification {}", self.method);
    }
}

/// Structural split of an inbound message: an id makes it a request.
#[derive(Debug)]
pub enum Inbound<P, R> {
    Request(Request<P, R>),
    Notification(Notification<P>),
}

impl<P, R> Inbound<P, R> {
    pub fn method(&self) -> &str {
        match self {
            Inbound::Request(request) => request.method(),
            Inbound::Notification(notification) => notification.method(),
        }
    }

    pub fn params(&self) -> &P {
        match self {
            Inbound::Request(request) => request.params(),
            Inbound::Notification(notification) => notification.params(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Inbound::Request(_))
    }

    pub fn as_request(&self) -> Option<&Request<P, R>> {
        match self {
            Inbound::Request(request) => Some(request),
            Inbound::Notification(_) => None,
        }
    }
}
