//! Method name to typed decoder lookup.
//!
//! Built once with [`RegistryBuilder`], then shared read-only. Each entry
//! decodes `params` into its own type and wraps the result in the caller's
//! message enum.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::BridgeError;
use crate::protocol::correlator::{OutboundSink, ResponsePayload};
use crate::protocol::envelope::InboundEnvelope;
use crate::protocol::message::{Inbound, Notification, Request, Respondable};

/// Why an envelope produced no message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("invalid params for `{method}`: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("`{0}` is a request and requires an id")]
    MissingId(String),
}

impl From<DispatchError> for BridgeError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownMethod(method) => BridgeError::UnknownMethod(method),
            other => BridgeError::MalformedMessage(other.to_string()),
        }
    }
}

/// A decoded message plus the handle that answers it, if it expects an
/// answer.
pub struct Dispatched<M> {
    pub message: M,
    pub reply: Option<Arc<dyn Respondable>>,
}

impl<M: fmt::Debug> fmt::Debug for Dispatched<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatched")
            .field("message", &self.message)
            .field("reply", &self.reply.as_ref().and_then(|r| r.id()))
            .finish()
    }
}

type Decoder<M> = Box<
    dyn Fn(&InboundEnvelope, &Arc<dyn OutboundSink>) -> Result<Dispatched<M>, DispatchError> + Send + Sync,
>;

/// Missing params arrive as null. A params type that rejects null is given an
/// empty object instead, so struct params fall back to their defaults.
fn decode_params<P: DeserializeOwned>(envelope: &InboundEnvelope) -> Result<P, DispatchError> {
    let decoded = match serde_json::from_value(envelope.params.clone()) {
        Err(_) if envelope.params.is_null() => serde_json::from_value(Value::Object(Map::new())),
        other => other,
    };
    decoded.map_err(|e| DispatchError::InvalidParams {
        method: envelope.method.clone(),
        reason: e.to_string(),
    })
}

/// Collects decoders before freezing them into a [`MethodRegistry`].
pub struct RegistryBuilder<M> {
    decoders: HashMap<String, Decoder<M>>,
}

impl<M> Default for RegistryBuilder<M> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<M: 'static> RegistryBuilder<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method whose kind follows the envelope: an id makes it a
    /// request, no id a notification.
    pub fn register<P, R, F>(self, method: impl Into<String>, ctor: F) -> Self
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: ResponsePayload,
        F: Fn(Inbound<P, R>) -> M + Send + Sync + 'static,
    {
        self.insert(
            method.into(),
            Box::new(move |envelope: &InboundEnvelope, sink: &Arc<dyn OutboundSink>| {
                let params: P = decode_params(envelope)?;
                match &envelope.id {
                    Some(id) => {
                        let request: Request<P, R> =
                            Request::new(id.clone(), envelope.method.clone(), params, Arc::clone(sink));
                        let reply: Arc<dyn Respondable> = Arc::new(request.responder());
                        Ok(Dispatched {
                            message: ctor(Inbound::Request(request)),
                            reply: Some(reply),
                        })
                    }
                    None => Ok(Dispatched {
                        message: ctor(Inbound::Notification(Notification::new(envelope.method.clone(), params))),
                        reply: None,
                    }),
                }
            }),
        )
    }

    /// Register a method that is always a request.
    pub fn register_request<P, R, F>(self, method: impl Into<String>, ctor: F) -> Self
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: ResponsePayload,
        F: Fn(Request<P, R>) -> M + Send + Sync + 'static,
    {
        self.insert(
            method.into(),
            Box::new(move |envelope: &InboundEnvelope, sink: &Arc<dyn OutboundSink>| {
                let id = envelope
                    .id
                    .clone()
                    .ok_or_else(|| DispatchError::MissingId(envelope.method.clone()))?;
                let params: P = decode_params(envelope)?;
                let request: Request<P, R> = Request::new(id, envelope.method.clone(), params, Arc::clone(sink));
                let reply: Arc<dyn Respondable> = Arc::new(request.responder());
                Ok(Dispatched {
                    message: ctor(request),
                    reply: Some(reply),
                })
            }),
        )
    }

    /// Register a method that is always a notification.
    pub fn register_notification<P, F>(self, method: impl Into<String>, ctor: F) -> Self
    where
        P: DeserializeOwned + Send + Sync + 'static,
        F: Fn(Notification<P>) -> M + Send + Sync + 'static,
    {
        self.insert(
            method.into(),
            Box::new(move |envelope: &InboundEnvelope, _sink: &Arc<dyn OutboundSink>| {
                if let Some(id) = &envelope.id {
                    log::warn!("Notification {} carried id {}, ignoring it", envelope.method, id);
                }
                let params: P = decode_params(envelope)?;
                Ok(Dispatched {
                    message: ctor(Notification::new(envelope.method.clone(), params)),
                    reply: None,
                })
            }),
        )
    }

    fn insert(mut self, method: String, decoder: Decoder<M>) -> Self {
        if self.decoders.insert(method.clone(), decoder).is_some() {
            log::warn!("Method {} registered twice, keeping the last decoder", method);
        }
        self
    }

    pub fn build(self) -> MethodRegistry<M> {
        MethodRegistry {
            decoders: self.decoders,
        }
    }
}

/// Immutable method table.
pub struct MethodRegistry<M> {
    decoders: HashMap<String, Decoder<M>>,
}

impl<M> MethodRegistry<M> {
    pub fn builder() -> RegistryBuilder<M> {
        RegistryBuilder {
            decoders: HashMap::new(),
        }
    }

    /// Decode an envelope, returning why it produced nothing.
    pub fn try_dispatch(
        &self,
        envelope: &InboundEnvelope,
        sink: &Arc<dyn OutboundSink>,
    ) -> Result<Dispatched<M>, DispatchError> {
        let decoder = self
            .decoders
            .get(&envelope.method)
            .ok_or_else(|| DispatchError::UnknownMethod(envelope.method.clone()))?;
        decoder(envelope, sink)
    }

    /// Decode an envelope; failures are logged and dropped.
    pub fn dispatch(&self, envelope: &InboundEnvelope, sink: &Arc<dyn OutboundSink>) -> Option<Dispatched<M>> {
        match self.try_dispatch(envelope, sink) {
            Ok(dispatched) => Some(dispatched),
            Err(DispatchError::UnknownMethod(method)) => {
                log::debug!("No decoder for method {}, dropping message", method);
                None
            }
            Err(e) => {
                log::warn!("Dropping message: {}", e);
                None
            }
        }
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.decoders.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::{OutboundEnvelope, decode_inbound};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<OutboundEnvelope>>,
    }

    impl OutboundSink for RecordingSink {
        fn send_envelope(&self, envelope: OutboundEnvelope) {
            self.sent.lock().unwrap().push(envelope);
        }
    }

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    #[derive(Debug)]
    enum TestMessage {
        Greet(Inbound<Greeting, Value>),
        Ask(Request<Value, Value>),
        Ping(Notification<Value>),
    }

    fn registry() -> MethodRegistry<TestMessage> {
        RegistryBuilder::new()
            .register("test.greet", TestMessage::Greet)
            .register_request("test.ask", TestMessage::Ask)
            .register_notification("test.ping", TestMessage::Ping)
            .build()
    }

    fn sink() -> Arc<dyn OutboundSink> {
        Arc::new(RecordingSink::default())
    }

    #[test]
    fn test_structural_request() {
        let envelope = decode_inbound(r#"{"id":"1","method":"test.greet","params":{"name":"ada"}}"#).unwrap();
        let dispatched = registry().dispatch(&envelope, &sink()).unwrap();

        assert!(dispatched.reply.is_some());
        match dispatched.message {
            TestMessage::Greet(Inbound::Request(request)) => {
                assert_eq!(request.id(), "1");
                assert_eq!(request.params().name, "ada");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_structural_notification() {
        let envelope = decode_inbound(r#"{"method":"test.greet","params":{"name":"bob"}}"#).unwrap();
        let dispatched = registry().dispatch(&envelope, &sink()).unwrap();

        assert!(dispatched.reply.is_none());
        assert!(matches!(dispatched.message, TestMessage::Greet(Inbound::Notification(_))));
    }

    #[test]
    fn test_request_without_id_is_rejected() {
        let envelope = decode_inbound(r#"{"method":"test.ask","params":{}}"#).unwrap();
        let err = registry().try_dispatch(&envelope, &sink()).unwrap_err();

        assert_eq!(err, DispatchError::MissingId("test.ask".to_string()));
        assert!(registry().dispatch(&envelope, &sink()).is_none());
    }

    #[test]
    fn test_notification_with_id_ignores_it() {
        let envelope = decode_inbound(r#"{"id":"5","method":"test.ping","params":null}"#).unwrap();
        let dispatched = registry().dispatch(&envelope, &sink()).unwrap();

        assert!(dispatched.reply.is_none());
        assert!(matches!(dispatched.message, TestMessage::Ping(_)));
    }

    #[test]
    fn test_unknown_method() {
        let envelope = decode_inbound(r#"{"id":"1","method":"test.nope"}"#).unwrap();
        let err = registry().try_dispatch(&envelope, &sink()).unwrap_err();

        assert_eq!(err, DispatchError::UnknownMethod("test.nope".to_string()));
        let bridge: BridgeError = err.into();
        assert!(matches!(bridge, BridgeError::UnknownMethod(_)));
    }

    #[test]
    fn test_missing_params_use_struct_defaults() {
        #[derive(Debug, Default, Deserialize)]
        #[serde(default)]
        struct Optional {
            reason: Option<String>,
        }

        let registry: MethodRegistry<Notification<Optional>> =
            RegistryBuilder::new().register_notification("test.bare", |n: Notification<Optional>| n).build();
        let envelope = decode_inbound(r#"{"method":"test.bare"}"#).unwrap();
        let dispatched = registry.try_dispatch(&envelope, &sink()).unwrap();
        assert!(dispatched.message.params().reason.is_none());

        let envelope = decode_inbound(r#"{"id":"1","method":"test.greet"}"#).unwrap();
        let err = self::registry().try_dispatch(&envelope, &sink()).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { .. }));
    }

    #[test]
    fn test_null_params_stay_null_for_value() {
        let envelope = decode_inbound(r#"{"method":"test.ping"}"#).unwrap();
        match registry().try_dispatch(&envelope, &sink()).unwrap().message {
            TestMessage::Ping(notification) => assert_eq!(notification.params(), &Value::Null),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_params() {
        let envelope = decode_inbound(r#"{"id":"1","method":"test.greet","params":{"name":42}}"#).unwrap();
        let err = registry().try_dispatch(&envelope, &sink()).unwrap_err();

        assert!(matches!(err, DispatchError::InvalidParams { ref method, .. } if method == "test.greet"));
    }

    #[test]
    fn test_reply_answers_request() {
        let recorder = Arc::new(RecordingSink::default());
        let sink: Arc<dyn OutboundSink> = recorder.clone();
        let envelope = decode_inbound(r#"{"id":"3","method":"test.ask","params":{}}"#).unwrap();
        let dispatched = registry().dispatch(&envelope, &sink).unwrap();

        let reply = dispatched.reply.unwrap();
        reply.respond_with_raw(r#""yes""#).unwrap();

        match dispatched.message {
            TestMessage::Ask(request) => assert!(request.is_answered()),
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(recorder.sent.lock().unwrap()[0], OutboundEnvelope::result("3", json!("yes")));
    }

    #[test]
    fn test_methods_listing() {
        let registry = registry();
        assert_eq!(registry.methods(), vec!["test.ask", "test.greet", "test.ping"]);
        assert!(registry.is_registered("test.ask"));
        assert!(!registry.is_registered("test.other"));
        assert_eq!(registry.len(), 3);
    }
}
