//! Duplex transport contract and its WebSocket implementation.
//!
//! A [`Connector`] opens one full-duplex channel and returns two halves:
//!
//! - an [`Arc<dyn DuplexSender>`] that queues outbound text frames onto a
//!   writer task, so sending never awaits socket I/O
//! - an [`InboundEvents`] receiver fed by a reader task with every text frame,
//!   followed by exactly one terminal [`TransportEvent::Closed`] or
//!   [`TransportEvent::Failed`]
//!
//! Reconnection and framing below the message level are not handled here;
//! the connection lifecycle manager decides when to open a new channel.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

/// Close code for a normal, client-initiated shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer closed without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Where and how to open a connection.
#[derive(Debug, Clone)]
pub struct Target {
	pub url: String,
	/// Extra headers sent with the opening request (auth, user agent).
	pub headers: Vec<(String, String)>,
}

impl Target {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			headers: Vec::new(),
		}
	}

	/// Sets a header, replacing any previous value for the same name.
	pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();
		self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
		self.headers.push((name, value.into()));
	}
}

/// Event produced by the reader side of a duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// One complete inbound text frame.
	Frame(String),
	/// The peer closed the channel cleanly.
	Closed { code: u16, reason: String },
	/// The channel broke (I/O error or abrupt disconnect).
	Failed(String),
}

/// Receiver of inbound transport events.
pub type InboundEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound half of an open duplex channel.
pub trait DuplexSender: Send + Sync {
	/// Queues one text frame for sending.
	fn send(&self, frame: String) -> Result<()>;

	/// Queues a close frame; the channel stops accepting frames afterwards.
	fn close(&self, code: u16, reason: &str) -> Result<()>;
}

/// Future returned by [`Connector::open`].
pub type OpenFuture<'a> =
	Pin<Box<dyn Future<Output = Result<(Arc<dyn DuplexSender>, InboundEvents)>> + Send + 'a>>;

/// Opens duplex channels. Implemented for WebSocket and by test doubles.
pub trait Connector: Send + Sync {
	fn open<'a>(&'a self, target: &'a Target) -> OpenFuture<'a>;
}

/// [`Connector`] backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
	fn open<'a>(&'a self, target: &'a Target) -> OpenFuture<'a> {
		Box::pin(WebSocketTransport::connect(target))
	}
}

/// WebSocket duplex channel.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Performs the WebSocket handshake and spawns the reader and writer tasks.
	pub async fn connect(target: &Target) -> Result<(Arc<dyn DuplexSender>, InboundEvents)> {
		let mut request = target
			.url
			.as_str()
			.into_client_request()
			.map_err(|e| Error::ConnectionFailed(format!("invalid target {}: {e}", target.url)))?;

		for (name, value) in &target.headers {
			let name = HeaderName::from_bytes(name.as_bytes())
				.map_err(|e| Error::InvalidArgument(format!("header name {name}: {e}")))?;
			let value = HeaderValue::from_str(value)
				.map_err(|e| Error::InvalidArgument(format!("header {name}: {e}")))?;
			request.headers_mut().insert(name, value);
		}

		tracing::debug!(url = %target.url, "Opening websocket");
		let (stream, _) = connect_async(request)
			.await
			.map_err(|e| Error::ConnectionFailed(e.to_string()))?;
		let (mut sink, mut source) = stream.split();

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

		let writer_events = inbound_tx.clone();
		tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				let closing = matches!(message, Message::Close(_));
				if let Err(e) = sink.send(message).await {
					tracing::error!("Transport write error: {}", e);
					let _ = writer_events.send(TransportEvent::Failed(e.to_string()));
					break;
				}
				if closing {
					break;
				}
			}
		});

		tokio::spawn(async move {
			while let Some(item) = source.next().await {
				let event = match item {
					Ok(Message::Text(text)) => TransportEvent::Frame(text),
					Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
						Ok(text) => TransportEvent::Frame(text),
						Err(e) => {
							tracing::warn!("Dropping non UTF-8 binary frame: {}", e);
							continue;
						}
					},
					Ok(Message::Close(frame)) => {
						let (code, reason) = frame
							.map(|f| (u16::from(f.code), f.reason.into_owned()))
							.unwrap_or((NO_STATUS_RECEIVED, String::new()));
						let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
						return;
					}
					Ok(_) => continue,
					Err(e) => {
						tracing::error!("Transport read error: {}", e);
						let _ = inbound_tx.send(TransportEvent::Failed(e.to_string()));
						return;
					}
				};
				if inbound_tx.send(event).is_err() {
					return;
				}
			}
			let _ = inbound_tx.send(TransportEvent::Failed(
				"connection ended without close frame".to_string(),
			));
		});

		let sender: Arc<dyn DuplexSender> = Arc::new(WebSocketSender {
			outbound: outbound_tx,
		});
		Ok((sender, inbound_rx))
	}
}

struct WebSocketSender {
	outbound: mpsc::UnboundedSender<Message>,
}

impl DuplexSender for WebSocketSender {
	fn send(&self, frame: String) -> Result<()> {
		self.outbound
			.send(Message::Text(frame))
			.map_err(|_| Error::ChannelClosed)
	}

	fn close(&self, code: u16, reason: &str) -> Result<()> {
		let frame = CloseFrame {
			code: CloseCode::from(code),
			reason: Cow::Owned(reason.to_string()),
		};
		self.outbound
			.send(Message::Close(Some(frame)))
			.map_err(|_| Error::ChannelClosed)
	}
}
