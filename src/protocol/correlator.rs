//! Per-request response correlation.
//!
//! Every inbound request gets one [`Responder`]. Whichever of a direct value,
//! the latest attached [`ResponseSource`], or an explicit cancel wins the
//! guard first while the request is unanswered produces the one and only
//! response envelope. Everything after that is a logged no-op.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::protocol::envelope::OutboundEnvelope;

/// Error text sent when a request is cancelled or its source fails.
pub const CANCELLED_REASON: &str = "cancelled";

/// Where finished response envelopes go.
pub trait OutboundSink: Send + Sync {
    fn send_envelope(&self, envelope: OutboundEnvelope);
}

/// A value that can be sent back as the result of a request.
///
/// `validate` runs right before sending; a failure turns the response into
/// an error envelope instead.
pub trait ResponsePayload: Serialize + DeserializeOwned + Send + 'static {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl ResponsePayload for Value {}

impl ResponsePayload for () {}

struct AttachedSource {
    generation: u64,
    cancel: CancellationToken,
}

/// Correlation state shared by every clone of a request.
#[derive(Default)]
pub struct PendingResponse {
    answered: bool,
    attached: Option<AttachedSource>,
    next_generation: u64,
}

impl PendingResponse {
    pub fn is_answered(&self) -> bool {
        self.answered
    }

    pub fn has_attached_source(&self) -> bool {
        self.attached.is_some()
    }

    /// Move to answered, cancelling any attached source.
    /// Returns false if the request was already answered.
    fn finish(&mut self) -> bool {
        if self.answered {
            return false;
        }
        if let Some(source) = self.attached.take() {
            source.cancel.cancel();
        }
        self.answered = true;
        true
    }
}

/// A deferred answer: a future plus a token the host can trigger to give up
/// on it.
pub struct ResponseSource<R> {
    future: BoxFuture<'static, std::result::Result<R, String>>,
    token: CancellationToken,
}

impl<R: Send + 'static> ResponseSource<R> {
    /// Wrap a future. Its error, if any, is only logged; the request is
    /// answered with the cancel envelope.
    pub fn new<F, E>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            future: future.map(|outcome| outcome.map_err(|e| e.to_string())).boxed(),
            token: CancellationToken::new(),
        }
    }

    /// Token that abandons this source when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    async fn resolve(self) -> std::result::Result<R, String> {
        let Self { future, token } = self;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CANCELLED_REASON.to_string()),
            outcome = future => outcome,
        }
    }
}

impl<R: Send + 'static> From<oneshot::Receiver<R>> for ResponseSource<R> {
    fn from(receiver: oneshot::Receiver<R>) -> Self {
        Self::new(receiver)
    }
}

impl<R> fmt::Debug for ResponseSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSource")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Answers exactly one request.
pub struct Responder<R> {
    id: String,
    method: String,
    state: Arc<Mutex<PendingResponse>>,
    sink: Arc<dyn OutboundSink>,
    _payload: PhantomData<fn(R)>,
}

impl<R> Clone for Responder<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            method: self.method.clone(),
            state: Arc::clone(&self.state),
            sink: Arc::clone(&self.sink),
            _payload: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("answered", &self.is_answered())
            .finish()
    }
}

impl<R> Responder<R> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_answered(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).is_answered()
    }

    /// Answer with the cancel envelope unless already answered.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.finish() {
                log::debug!("Ignoring cancel for already answered request {} ({})", self.id, self.method);
                return;
            }
        }
        self.send_cancel();
    }

    fn send_cancel(&self) {
        log::debug!("Cancelling request {} ({})", self.id, self.method);
        self.sink
            .send_envelope(OutboundEnvelope::error(self.id.clone(), CANCELLED_REASON));
    }
}

impl<R: ResponsePayload> Responder<R> {
    pub fn new(id: impl Into<String>, method: impl Into<String>, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            state: Arc::new(Mutex::new(PendingResponse::default())),
            sink,
            _payload: PhantomData,
        }
    }

    /// Answer with `value` unless already answered.
    pub fn respond_with(&self, value: R) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.finish() {
                log::warn!("Request {} ({}) already answered, dropping response", self.id, self.method);
                return;
            }
        }
        self.send_value(value);
    }

    /// Answer with whatever `source` eventually produces.
    ///
    /// A previously attached source is cancelled and forgotten. If the
    /// request is already answered the source is dropped without being
    /// polled and its token is left alone.
    pub fn respond_with_source(&self, source: ResponseSource<R>) {
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.answered {
                log::warn!("Request {} ({}) already answered, dropping source", self.id, self.method);
                return;
            }
            if let Some(previous) = state.attached.take() {
                log::debug!("Replacing source for request {}", self.id);
                previous.cancel.cancel();
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            state.attached = Some(AttachedSource {
                generation,
                cancel: source.cancellation_token(),
            });
            generation
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let responder = self.clone();
                handle.spawn(async move {
                    let outcome = source.resolve().await;
                    responder.complete_source(generation, outcome);
                });
            }
            Err(e) => {
                log::warn!("No async runtime for request {} source: {}", self.id, e);
                self.complete_source(generation, Err(e.to_string()));
            }
        }
    }

    /// Decode `raw` as `R` and answer with it.
    ///
    /// A decode failure leaves the request unanswered.
    pub fn respond_with_raw(&self, raw: &str) -> Result<()> {
        let value: R = serde_json::from_str(raw).map_err(|e| {
            BridgeError::DecodingFailed(format!("{} response for request {}: {}", self.method, self.id, e))
        })?;
        self.respond_with(value);
        Ok(())
    }

    fn complete_source(&self, generation: u64, outcome: std::result::Result<R, String>) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.answered {
                return;
            }
            match &state.attached {
                Some(attached) if attached.generation == generation => {}
                _ => {
                    log::debug!("Discarding superseded source {} for request {}", generation, self.id);
                    return;
                }
            }
            state.attached = None;
            state.answered = true;
        }

        match outcome {
            Ok(value) => self.send_value(value),
            Err(reason) => {
                log::debug!("Source for request {} did not produce a value: {}", self.id, reason);
                self.send_cancel();
            }
        }
    }

    fn send_value(&self, value: R) {
        let envelope = match value.validate() {
            Ok(()) => match serde_json::to_value(&value) {
                Ok(result) => OutboundEnvelope::result(self.id.clone(), result),
                Err(e) => {
                    log::error!("Failed to encode response for request {}: {}", self.id, e);
                    return;
                }
            },
            Err(reason) => {
                log::warn!("Response for request {} ({}) failed validation: {}", self.id, self.method, reason);
                OutboundEnvelope::error(self.id.clone(), BridgeError::ValidationFailed(reason).to_string())
            }
        };
        self.sink.send_envelope(envelope);
    }
}
