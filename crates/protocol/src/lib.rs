//! Wire types for JSON-RPC 2.0 over HTTP and WebSocket.
//!
//! This crate contains the serde-serializable shapes exchanged with a
//! JSON-RPC server. Types here are pure data; correlation, connection
//! management and typed decoding live in `jrpc-runtime`.
//!
//! # Main Types
//!
//! - [`Request`] - outbound call, always carrying a numeric id
//! - [`Response`] - reply to a call, holding either a result or an [`ErrorObject`]
//! - [`Notification`] - server push for an active subscription
//! - [`Message`] - untagged union of everything that can arrive on a duplex connection

pub mod auth;
pub mod message;

pub use auth::basic_auth;
pub use message::*;

/// Media type used for every request body and expected on every HTTP reply.
pub const APPLICATION_JSON: &str = "application/json";
