//! HTTP Basic authentication header encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Builds the value of an `Authorization` header for HTTP Basic auth.
///
/// Used for both the HTTP POST of unary calls and the WebSocket upgrade request.
pub fn basic_auth(username: &str, password: &str) -> String {
	let credentials = format!("{username}:{password}");
	format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}
