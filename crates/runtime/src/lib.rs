//! JSON-RPC runtime - connection lifecycle, call correlation and subscriptions
//!
//! This crate provides the machinery for talking to a JSON-RPC 2.0 server:
//!
//! - **Codec**: Request encoding, reply decoding and call id assignment
//! - **Transport**: Duplex channel contract and its WebSocket implementation
//! - **Connection**: Lazy single-connection lifecycle, reply correlation and
//!   notification routing
//! - **Adapters**: [`DuplexAdapter`] for calls and subscriptions over one
//!   shared channel, [`HttpAdapter`] for one POST per call
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   jrpc-rs    │  Client façade, typed call descriptions
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │ jrpc-runtime │  This crate
//! │  ┌────────┐  │
//! │  │ Adapt  │  │  DuplexAdapter / HttpAdapter
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Lifecycle, calls, subscriptions, router
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  WebSocket reader/writer tasks
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod adapter;
pub mod codec;
pub(crate) mod connection;
pub mod error;
pub mod http;
pub mod subscription;
pub mod transport;

// Re-export key types at crate root
pub use adapter::{CloseHook, DuplexAdapter, DuplexAdapterBuilder, run_close_hook};
pub use codec::RpcCoder;
pub use connection::{ConnectionState, LifecycleEvent, transition};
pub use error::{Error, Result};
pub use http::{HttpAdapter, HttpAdapterBuilder};
pub use subscription::{Event, Subscription};
pub use transport::{
	Connector, DuplexSender, InboundEvents, OpenFuture, Target, TransportEvent, WebSocketConnector,
	WebSocketTransport,
};
