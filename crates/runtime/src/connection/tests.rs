use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::*;
use crate::adapter::DuplexAdapter;
use crate::transport::{InboundEvents, OpenFuture};

/// Server side of one mock channel.
struct MockPeer {
	sent: mpsc::UnboundedReceiver<String>,
	events: mpsc::UnboundedSender<TransportEvent>,
	closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl MockPeer {
	async fn next_request(&mut self) -> Value {
		let text = self.sent.recv().await.unwrap();
		serde_json::from_str(&text).unwrap()
	}

	fn push(&self, frame: Value) {
		self.events.send(TransportEvent::Frame(frame.to_string())).unwrap();
	}

	fn reply(&self, id: &Value, result: Value) {
		self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
	}

	fn notify(&self, method: &str, subscription: &str, result: Value) {
		self.push(json!({
			"jsonrpc": "2.0",
			"method": method,
			"params": {"subscription": subscription, "result": result}
		}));
	}
}

struct MockSender {
	sent: mpsc::UnboundedSender<String>,
	closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl DuplexSender for MockSender {
	fn send(&self, frame: String) -> Result<()> {
		self.sent.send(frame).map_err(|_| Error::ChannelClosed)
	}

	fn close(&self, code: u16, reason: &str) -> Result<()> {
		self.closes.lock().push((code, reason.to_string()));
		Ok(())
	}
}

struct MockConnector {
	opens: AtomicUsize,
	refuse: AtomicBool,
	open_delay: Duration,
	peers: mpsc::UnboundedSender<MockPeer>,
}

impl Connector for MockConnector {
	fn open<'a>(&'a self, _target: &'a Target) -> OpenFuture<'a> {
		Box::pin(async move {
			self.opens.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(self.open_delay).await;
			if self.refuse.load(Ordering::SeqCst) {
				return Err(Error::ConnectionFailed("connection refused".to_string()));
			}

			let (sent_tx, sent_rx) = mpsc::unbounded_channel();
			let (events_tx, events_rx): (_, InboundEvents) = mpsc::unbounded_channel();
			let closes = Arc::new(Mutex::new(Vec::new()));
			let _ = self.peers.send(MockPeer {
				sent: sent_rx,
				events: events_tx,
				closes: Arc::clone(&closes),
			});
			let sender: Arc<dyn DuplexSender> = Arc::new(MockSender {
				sent: sent_tx,
				closes,
			});
			Ok((sender, events_rx))
		})
	}
}

fn mock(open_delay: Duration) -> (Arc<MockConnector>, mpsc::UnboundedReceiver<MockPeer>) {
	let (peers, peer_rx) = mpsc::unbounded_channel();
	let connector = Arc::new(MockConnector {
		opens: AtomicUsize::new(0),
		refuse: AtomicBool::new(false),
		open_delay,
		peers,
	});
	(connector, peer_rx)
}

fn adapter(connector: &Arc<MockConnector>) -> DuplexAdapter {
	DuplexAdapter::builder()
		.target("ws://mock")
		.connector(Arc::clone(connector) as Arc<dyn Connector>)
		.resolve_timeout(Duration::from_millis(500))
		.build()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
	for _ in 0..200 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached");
}

#[test]
fn test_transition_table() {
	let handle: Arc<dyn DuplexSender> = Arc::new(MockSender {
		sent: mpsc::unbounded_channel().0,
		closes: Arc::default(),
	});
	let cause: Arc<str> = Arc::from("boom");

	let next = |state: &ConnectionState, event| transition(state, event).map(|s| s.name());

	assert_eq!(next(&ConnectionState::Idle, LifecycleEvent::Demand), Some("connecting"));
	assert_eq!(next(&ConnectionState::Closed, LifecycleEvent::Demand), Some("connecting"));
	assert_eq!(next(&ConnectionState::Closing, LifecycleEvent::Demand), Some("connecting"));
	assert_eq!(next(&ConnectionState::Connecting, LifecycleEvent::Demand), None);
	assert_eq!(
		next(&ConnectionState::Connecting, LifecycleEvent::Opened(Arc::clone(&handle))),
		Some("connected")
	);
	assert_eq!(
		next(&ConnectionState::Connecting, LifecycleEvent::Failed(Arc::clone(&cause))),
		Some("failed")
	);
	assert_eq!(next(&ConnectionState::Connecting, LifecycleEvent::CloseRequested), Some("closed"));

	let connected = ConnectionState::Connected(Arc::clone(&handle));
	assert_eq!(next(&connected, LifecycleEvent::Demand), None);
	assert_eq!(next(&connected, LifecycleEvent::CloseRequested), Some("closing"));
	assert_eq!(next(&connected, LifecycleEvent::Closed), Some("closed"));
	assert_eq!(next(&connected, LifecycleEvent::Failed(Arc::clone(&cause))), Some("failed"));
	assert_eq!(next(&ConnectionState::Closing, LifecycleEvent::Closed), Some("closed"));

	let failed = ConnectionState::Failed(cause);
	assert_eq!(next(&failed, LifecycleEvent::Demand), None);
	assert_eq!(next(&failed, LifecycleEvent::Drained), Some("idle"));
	assert_eq!(next(&ConnectionState::Idle, LifecycleEvent::Opened(handle)), None);
	assert_eq!(next(&ConnectionState::Closed, LifecycleEvent::Closed), None);
}

#[tokio::test]
async fn test_concurrent_calls_open_one_connection() {
	let (connector, mut peers) = mock(Duration::from_millis(20));
	let adapter = Arc::new(adapter(&connector));

	let mut calls = Vec::new();
	for n in 0..8u64 {
		let adapter = Arc::clone(&adapter);
		calls.push(tokio::spawn(async move {
			adapter.call::<u64>("echo", json!([n])).await
		}));
	}

	let mut peer = peers.recv().await.unwrap();
	tokio::spawn(async move {
		while let Some(text) = peer.sent.recv().await {
			let request: Value = serde_json::from_str(&text).unwrap();
			peer.reply(&request["id"], request["params"][0].clone());
		}
	});

	let mut results = Vec::new();
	for call in calls {
		results.push(call.await.unwrap().unwrap());
	}
	results.sort_unstable();
	assert_eq!(results, (0..8).collect::<Vec<u64>>());
	assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
	assert!(adapter.state().is_connected());
}

#[tokio::test]
async fn test_closed_adapter_rejects_without_connecting() {
	let (connector, _peers) = mock(Duration::ZERO);
	let hook_calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&hook_calls);
	let adapter = DuplexAdapter::builder()
		.connector(Arc::clone(&connector) as Arc<dyn Connector>)
		.on_close(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
		.build();

	adapter.close();
	adapter.close();

	let err = adapter.call::<String>("chain_getHead", json!([])).await.unwrap_err();
	assert!(err.is_closed(), "got {err:?}");
	let err = adapter
		.subscribe::<Value>("chain_subscribeNewHead", json!([]), "chain_unsubscribeNewHead")
		.await
		.err()
		.unwrap();
	assert!(err.is_closed(), "got {err:?}");

	assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
	assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_hook_error_is_swallowed() {
	let (connector, _peers) = mock(Duration::ZERO);
	let adapter = DuplexAdapter::builder()
		.connector(Arc::clone(&connector) as Arc<dyn Connector>)
		.on_close(|| Err("cleanup failed".into()))
		.build();
	adapter.close();
	assert!(adapter.is_closed());
}

#[tokio::test]
async fn test_reply_resolves_only_matching_call() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let first = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("first", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let first_request = peer.next_request().await;

	let second = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("second", json!([])).await }
	});
	let second_request = peer.next_request().await;
	assert_ne!(first_request["id"], second_request["id"]);

	peer.reply(&second_request["id"], json!("two"));
	assert_eq!(second.await.unwrap().unwrap(), "two");
	assert!(!first.is_finished());

	// reply for an id nobody waits on is ignored
	peer.reply(&json!(999), json!("stray"));
	peer.reply(&first_request["id"], json!("one"));
	assert_eq!(first.await.unwrap().unwrap(), "one");
	assert_eq!(adapter.connection.calls.len(), 0);
}

#[tokio::test]
async fn test_server_error_fails_only_that_call() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_foo", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.push(json!({
		"jsonrpc": "2.0",
		"id": request["id"],
		"error": {"code": -32601, "message": "Method not found"}
	}));

	let err = call.await.unwrap().unwrap_err();
	assert_eq!(err.rpc_code(), Some(-32601));
	assert!(adapter.state().is_connected());
}

#[tokio::test]
async fn test_malformed_result_fails_call_and_deregisters() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<u64>("system_health", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!({"peers": 3}));

	let err = call.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::MalformedPayload(_)), "got {err:?}");
	assert_eq!(adapter.connection.calls.len(), 0);
}

#[tokio::test]
async fn test_dropped_call_is_deregistered() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = DuplexAdapter::builder()
		.connector(Arc::clone(&connector) as Arc<dyn Connector>)
		.request_timeout(Duration::from_millis(50))
		.build();

	let pending = adapter.call::<String>("chain_getHead", json!([]));
	let (result, peer) = tokio::join!(pending, peers.recv());
	let mut peer = peer.unwrap();

	assert!(matches!(result, Err(Error::Timeout(_))), "got {result:?}");
	assert_eq!(adapter.connection.calls.len(), 0);

	// the late reply is ignored and the connection stays usable
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("late"));
	assert!(adapter.state().is_connected());
}

#[tokio::test]
async fn test_open_failure_fails_call_and_allows_retry() {
	let (connector, mut peers) = mock(Duration::ZERO);
	connector.refuse.store(true, Ordering::SeqCst);
	let adapter = adapter(&connector);

	let err = adapter.call::<String>("chain_getHead", json!([])).await.unwrap_err();
	assert!(err.is_connection_failure(), "got {err:?}");
	assert!(err.to_string().contains("connection refused"), "got {err}");
	wait_until(|| matches!(adapter.state(), ConnectionState::Idle)).await;

	connector.refuse.store(false, Ordering::SeqCst);
	let adapter = Arc::new(adapter);
	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("0xabc"));

	assert_eq!(call.await.unwrap().unwrap(), "0xabc");
	assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_drains_calls_and_subscriptions() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let subscribe = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move {
			adapter
				.subscribe::<Value>("chain_subscribeNewHead", json!([]), "chain_unsubscribeNewHead")
				.await
		}
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("sub-1"));
	let subscription = subscribe.await.unwrap().unwrap();

	let (ended_tx, ended_rx) = oneshot::channel::<()>();
	let ended = Mutex::new(Some(ended_tx));
	subscription.set_handler(move |_event: crate::Event<Value>| {
		let _ = ended.lock().take();
	});

	let calls: Vec<_> = (0..2)
		.map(|_| {
			let adapter = Arc::clone(&adapter);
			tokio::spawn(async move { adapter.call::<String>("chain_getHead", json!([])).await })
		})
		.collect();
	peer.next_request().await;
	peer.next_request().await;

	peer.events
		.send(TransportEvent::Failed("connection reset".to_string()))
		.unwrap();

	for call in calls {
		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::ConnectionFailed(_)), "got {err:?}");
	}
	// the handler task ends when the stream is torn down, dropping the sender
	assert!(ended_rx.await.is_err());
	assert!(subscription.is_closed());
	assert_eq!(adapter.connection.calls.len(), 0);
	assert_eq!(adapter.connection.subscriptions.active_count(), 0);
	wait_until(|| matches!(adapter.state(), ConnectionState::Idle)).await;

	// next demand reconnects
	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("0x01"));
	assert_eq!(call.await.unwrap().unwrap(), "0x01");
	assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_peer_close_fails_pending_calls() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	peer.next_request().await;
	peer.events
		.send(TransportEvent::Closed {
			code: 1001,
			reason: "going away".to_string(),
		})
		.unwrap();

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_connection_failure(), "got {err:?}");
	assert!(matches!(adapter.state(), ConnectionState::Closed));
}

#[tokio::test]
async fn test_notification_before_subscribe_reply_is_delivered() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let subscribe = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move {
			adapter
				.subscribe::<Value>("chain_subscribeNewHead", json!([]), "chain_unsubscribeNewHead")
				.await
		}
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	assert_eq!(request["method"], "chain_subscribeNewHead");

	// event first, then the reply carrying its subscription id
	peer.notify(
		"chain_newHead",
		"EsqruyKPnZvPZ6fr",
		json!({"number": "0x1d878c", "parentHash": "0xbe9110f6"}),
	);
	peer.reply(&request["id"], json!("EsqruyKPnZvPZ6fr"));

	let subscription = subscribe.await.unwrap().unwrap();
	assert_eq!(subscription.id(), "EsqruyKPnZvPZ6fr");

	let (tx, mut rx) = mpsc::unbounded_channel();
	subscription.set_handler(move |event| {
		let _ = tx.send(event);
	});
	let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(event.method, "chain_newHead");
	assert_eq!(event.value["number"], "0x1d878c");
}

#[tokio::test]
async fn test_subscription_events_in_order() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let subscribe = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move {
			adapter
				.subscribe::<String>(
					"chain_subscribeFinalizedHeads",
					json!([]),
					"chain_unsubscribeFinalizedHeads",
				)
				.await
		}
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!(7));
	let subscription = subscribe.await.unwrap().unwrap();
	assert_eq!(subscription.id(), "7");

	let (tx, mut rx) = mpsc::unbounded_channel();
	subscription.set_handler(move |event: crate::Event<String>| {
		let _ = tx.send(event.value);
	});

	for n in 0..5 {
		peer.notify("chain_finalizedHead", "7", json!(format!("0x{n:02}")));
	}
	// undecodable event is dropped without ending the stream
	peer.notify("chain_finalizedHead", "7", json!({"not": "a string"}));
	peer.notify("chain_finalizedHead", "7", json!("0x05"));

	let mut seen = Vec::new();
	while seen.len() < 6 {
		seen.push(rx.recv().await.unwrap());
	}
	assert_eq!(seen, vec!["0x00", "0x01", "0x02", "0x03", "0x04", "0x05"]);
}

#[tokio::test]
async fn test_unknown_subscription_is_dropped() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;

	peer.notify("chain_newHead", "nobody", json!({}));
	peer.push(json!({"jsonrpc": "2.0", "id": null, "something": "else"}));
	peer.events.send(TransportEvent::Frame("not json".to_string())).unwrap();
	peer.reply(&request["id"], json!("0x02"));

	assert_eq!(call.await.unwrap().unwrap(), "0x02");
	assert!(adapter.state().is_connected());
}

#[tokio::test]
async fn test_subscription_close_sends_unsubscribe() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let subscribe = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move {
			adapter
				.subscribe::<Value>("chain_subscribeNewHead", json!([]), "chain_unsubscribeNewHead")
				.await
		}
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("sub-9"));
	let subscription = subscribe.await.unwrap().unwrap();

	let close = tokio::spawn(async move {
		subscription.close().await.unwrap();
		subscription
	});
	let unsubscribe = peer.next_request().await;
	assert_eq!(unsubscribe["method"], "chain_unsubscribeNewHead");
	assert_eq!(unsubscribe["params"], json!(["sub-9"]));
	peer.reply(&unsubscribe["id"], json!(true));

	let subscription = close.await.unwrap();
	assert!(subscription.is_closed());
	assert_eq!(adapter.connection.subscriptions.active_count(), 0);

	// closing again sends nothing
	subscription.close().await.unwrap();
	drop(subscription);
	assert!(
		tokio::time::timeout(Duration::from_millis(50), peer.sent.recv())
			.await
			.is_err()
	);
}

#[tokio::test]
async fn test_adapter_close_sends_close_frame_and_fails_calls() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	peer.next_request().await;

	adapter.close();
	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_connection_failure(), "got {err:?}");
	assert_eq!(peer.closes.lock().as_slice(), &[(1000, "close".to_string())]);
	assert!(matches!(adapter.state(), ConnectionState::Closed));
}

#[tokio::test]
async fn test_resolve_fails_fast_when_nothing_is_starting() {
	let registry = SubscriptionRegistry::new(Duration::from_secs(5));
	let err = registry.resolve("missing").await.err().unwrap();
	assert!(matches!(err, Error::UnknownSubscription(_)), "got {err:?}");
}

#[tokio::test]
async fn test_resolve_times_out_while_starting() {
	let registry = Arc::new(SubscriptionRegistry::new(Duration::from_millis(20)));
	let _starting = registry.start(1, "Value");
	let err = registry.resolve("never").await.err().unwrap();
	assert!(err.is_decode_error(), "got {err:?}");
}

#[tokio::test]
async fn test_activation_after_clear_is_refused() {
	let registry = Arc::new(SubscriptionRegistry::new(Duration::from_millis(20)));
	let starting = registry.start(1, "Value");
	registry.clear();
	let err = registry
		.activate(starting, "late".to_string(), "sub", "unsub")
		.err()
		.unwrap();
	assert!(err.is_connection_failure(), "got {err:?}");
	assert_eq!(registry.active_count(), 0);
	assert_eq!(registry.starting_count(), 0);
}

#[tokio::test]
async fn test_early_buffer_keeps_newest_events() {
	let registry = Arc::new(SubscriptionRegistry::new(Duration::from_millis(20)));
	let starting = registry.start(1, "Value");
	let entry = registry
		.activate(starting, "s".to_string(), "sub", "unsub")
		.unwrap();

	for n in 0..20 {
		registry.route(serde_json::from_value(json!({
			"method": "ev",
			"params": {"subscription": "s", "result": n}
		}))
		.unwrap());
	}
	let (early, _live) = entry.attach().unwrap();
	let values: Vec<Value> = early.into_iter().map(|n| n.params.result).collect();
	assert_eq!(values.len(), 16);
	assert_eq!(values.first(), Some(&json!(4)));
	assert_eq!(values.last(), Some(&json!(19)));
}

#[tokio::test]
async fn test_handler_replace_detach_and_reattach() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let subscribe = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move {
			adapter
				.subscribe::<u64>("chain_subscribeNewHead", json!([]), "chain_unsubscribeNewHead")
				.await
		}
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("heads"));
	let subscription = subscribe.await.unwrap().unwrap();

	let handler = |tx: mpsc::UnboundedSender<u64>| {
		move |event: crate::Event<u64>| {
			let _ = tx.send(event.value);
		}
	};
	let (first_tx, mut first) = mpsc::unbounded_channel();
	let (second_tx, mut second) = mpsc::unbounded_channel();
	subscription.set_handler(handler(first_tx));
	subscription.set_handler(handler(second_tx));

	peer.notify("chain_newHead", "heads", json!(1));
	let value = tokio::time::timeout(Duration::from_secs(1), second.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(value, 1);
	assert!(first.try_recv().is_err());

	// routed with no handler attached
	subscription.remove_handler();
	peer.notify("chain_newHead", "heads", json!(2));

	// a reply after the event proves the event has been routed
	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("0x02"));
	assert_eq!(call.await.unwrap().unwrap(), "0x02");

	let (third_tx, mut third) = mpsc::unbounded_channel();
	subscription.set_handler(handler(third_tx));
	peer.notify("chain_newHead", "heads", json!(3));
	let value = tokio::time::timeout(Duration::from_secs(1), third.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(value, 3);
	assert!(second.try_recv().is_err());
}

#[tokio::test]
async fn test_no_new_attempt_while_closing() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));
	adapter
		.connection
		.lifecycle
		.send_modify(|snapshot| snapshot.state = ConnectionState::Closing);

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
	assert!(!call.is_finished());

	// once the old channel has drained and closed, the waiting call reconnects
	adapter
		.connection
		.lifecycle
		.send_modify(|snapshot| snapshot.state = ConnectionState::Closed);
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("0x03"));
	assert_eq!(call.await.unwrap().unwrap(), "0x03");
	assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_peer_close_then_reconnect() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	peer.next_request().await;
	peer.events
		.send(TransportEvent::Closed {
			code: 1000,
			reason: String::new(),
		})
		.unwrap();
	assert!(call.await.unwrap().unwrap_err().is_connection_failure());
	wait_until(|| matches!(adapter.state(), ConnectionState::Closed)).await;

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;
	peer.reply(&request["id"], json!("0x04"));
	assert_eq!(call.await.unwrap().unwrap(), "0x04");
	assert_eq!(adapter.connection.subscriptions.active_count(), 0);
	assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_call_failed_while_acquiring_is_not_sent() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = adapter(&connector);
	let connection = Arc::clone(&adapter.connection);

	let reply = connection.calls.register(41, "chain_getHead", "String").unwrap();
	assert_eq!(connection.calls.fail_all("connection reset"), 1);

	connection.send(41, "chain_getHead", json!([])).await.unwrap();
	let err = reply.await.unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed(_)), "got {err:?}");

	let mut peer = peers.recv().await.unwrap();
	assert!(peer.sent.try_recv().is_err());
	assert!(!connection.calls.contains(41));
}

#[tokio::test]
async fn test_server_request_does_not_resolve_call() {
	let (connector, mut peers) = mock(Duration::ZERO);
	let adapter = Arc::new(adapter(&connector));

	let call = tokio::spawn({
		let adapter = Arc::clone(&adapter);
		async move { adapter.call::<String>("chain_getHead", json!([])).await }
	});
	let mut peer = peers.recv().await.unwrap();
	let request = peer.next_request().await;

	// same id as the pending call, but neither carries a result or an error
	peer.push(json!({"jsonrpc": "2.0", "id": request["id"], "method": "client_ping", "params": []}));
	peer.push(json!({"jsonrpc": "2.0", "id": request["id"]}));
	peer.reply(&request["id"], json!("0x05"));

	assert_eq!(call.await.unwrap().unwrap(), "0x05");
	assert_eq!(adapter.connection.calls.len(), 0);
}
