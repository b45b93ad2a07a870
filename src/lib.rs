//! Surface Bridge - typed message correlation for embedded web surfaces
//!
//! Turns a postMessage-style string channel into typed requests,
//! notifications, and exactly-once responses, and caches the expensive
//! render surface that channel lives on.

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod tracker;
pub mod ui;

pub use error::{BridgeError, Result, SessionError};
