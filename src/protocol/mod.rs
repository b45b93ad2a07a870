//! Message correlation protocol over a string channel.
//!
//! - `envelope`: wire format and codec
//! - `registry`: method name to typed decoder table
//! - `correlator`: exactly-once response state per request
//! - `message`: typed requests and notifications

pub mod correlator;
pub mod envelope;
pub mod message;
pub mod registry;

pub use correlator::{CANCELLED_REASON, OutboundSink, PendingResponse, Responder, ResponsePayload, ResponseSource};
pub use envelope::{
    DecodeError, InboundEnvelope, OutboundEnvelope, Outcome, PROTOCOL_VERSION, decode_inbound, decode_outbound,
    encode, encode_inbound,
};
pub use message::{Inbound, Notification, Request, Respondable};
pub use registry::{DispatchError, Dispatched, MethodRegistry, RegistryBuilder};
