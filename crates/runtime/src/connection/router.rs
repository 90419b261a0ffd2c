//! Classifies inbound frames and dispatches them to the registries.

use std::sync::Arc;

use jrpc_protocol::Message;

use super::calls::CallRegistry;
use super::subscriptions::SubscriptionRegistry;
use crate::codec::RpcCoder;

/// Routes every inbound frame of the connection, in arrival order.
pub(crate) struct FrameRouter {
	coder: Arc<RpcCoder>,
	calls: Arc<CallRegistry>,
	subscriptions: Arc<SubscriptionRegistry>,
}

impl FrameRouter {
	pub fn new(
		coder: Arc<RpcCoder>,
		calls: Arc<CallRegistry>,
		subscriptions: Arc<SubscriptionRegistry>,
	) -> Self {
		Self {
			coder,
			calls,
			subscriptions,
		}
	}

	pub fn route(&self, text: &str) {
		match self.coder.decode_frame(text) {
			Ok(Message::Response(response)) => {
				self.calls.resolve(response);
			}
			Ok(Message::Notification(notification)) => self.subscriptions.route(notification),
			Ok(Message::Unknown(_)) => {
				tracing::debug!("Ignoring unrecognised frame: {}", text);
			}
			Err(e) => {
				tracing::warn!("Failed to parse frame: {}", e);
			}
		}
	}
}
