//! Connection lifecycle state machine.
//!
//! All state changes go through [`transition`], a pure function of the
//! current state and one [`LifecycleEvent`]. Events that make no sense in the
//! current state (a stale `Opened` after a close, a second `Failed`) yield
//! `None` and leave the state untouched.

use std::fmt;
use std::sync::Arc;

use crate::transport::DuplexSender;

/// State of the single shared connection.
#[derive(Clone)]
pub enum ConnectionState {
	Idle,
	Connecting,
	/// Live channel, owned by the connection for as long as this state lasts.
	Connected(Arc<dyn DuplexSender>),
	Closing,
	Closed,
	Failed(Arc<str>),
}

impl ConnectionState {
	pub fn name(&self) -> &'static str {
		match self {
			ConnectionState::Idle => "idle",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Connected(_) => "connected",
			ConnectionState::Closing => "closing",
			ConnectionState::Closed => "closed",
			ConnectionState::Failed(_) => "failed",
		}
	}

	/// Connecting or connected: a channel exists or is being opened.
	pub fn is_live(&self) -> bool {
		matches!(
			self,
			ConnectionState::Connecting | ConnectionState::Connected(_)
		)
	}

	pub fn is_connected(&self) -> bool {
		matches!(self, ConnectionState::Connected(_))
	}
}

impl fmt::Debug for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionState::Failed(cause) => f.debug_tuple("Failed").field(cause).finish(),
			other => f.write_str(other.name()),
		}
	}
}

/// Discrete input to the state machine.
#[derive(Clone)]
pub enum LifecycleEvent {
	/// A caller needs the connection.
	Demand,
	/// The transport finished opening.
	Opened(Arc<dyn DuplexSender>),
	/// Open error, I/O error or abrupt disconnect.
	Failed(Arc<str>),
	/// Explicit shutdown requested by the owner.
	CloseRequested,
	/// The channel finished closing (either side).
	Closed,
	/// Outstanding work of a failed connection has been resolved.
	Drained,
}

/// Computes the next state, or `None` if `event` does not apply to `state`.
pub fn transition(state: &ConnectionState, event: LifecycleEvent) -> Option<ConnectionState> {
	use ConnectionState as S;
	use LifecycleEvent as E;

	match (state, event) {
		(S::Idle | S::Closing | S::Closed, E::Demand) => Some(S::Connecting),
		(S::Connecting, E::Opened(handle)) => Some(S::Connected(handle)),
		(S::Connecting | S::Connected(_), E::Failed(cause)) => Some(S::Failed(cause)),
		(S::Connected(_), E::CloseRequested) => Some(S::Closing),
		(S::Connecting, E::CloseRequested) => Some(S::Closed),
		(S::Connected(_) | S::Closing, E::Closed) => Some(S::Closed),
		(S::Failed(_), E::Drained) => Some(S::Idle),
		_ => None,
	}
}

/// Authoritative value published through the connection's watch channel.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
	pub state: ConnectionState,
	/// Incremented on every `Demand` that starts a new connection attempt;
	/// events from older attempts are ignored.
	pub generation: u64,
	pub last_failure: Option<Arc<str>>,
}

impl Default for Snapshot {
	fn default() -> Self {
		Self {
			state: ConnectionState::Idle,
			generation: 0,
			last_failure: None,
		}
	}
}
