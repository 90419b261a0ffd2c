//! Command implementations.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use jrpc::{Client, DuplexAdapter, HttpAdapter, RpcCall, SubscribeCall};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::cli::{Cli, Commands, NodeArgs, OutputFormat};

/// Which adapter a node URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
	Http,
	WebSocket,
}

impl Scheme {
	pub fn of(url: &str) -> Result<Self> {
		let parsed = Url::parse(url).with_context(|| format!("Invalid node URL: {url}"))?;
		match parsed.scheme() {
			"http" | "https" => Ok(Scheme::Http),
			"ws" | "wss" => Ok(Scheme::WebSocket),
			other => bail!("Unsupported URL scheme '{other}' (expected http, https, ws or wss)"),
		}
	}
}

/// Parses a positional param as JSON, falling back to a plain string.
pub fn parse_param(raw: &str) -> Value {
	serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	match cli.command {
		Commands::Call { method, params } => {
			let client = build_client(&cli.node)?;
			let result = call(&client, &method, &params).await;
			client.close();
			print_value(&result?, format)
		}
		Commands::Subscribe {
			method,
			unsubscribe,
			params,
			count,
		} => {
			if Scheme::of(&cli.node.url)? != Scheme::WebSocket {
				bail!("Subscriptions need a ws:// or wss:// node URL, got {}", cli.node.url);
			}
			let client = build_client(&cli.node)?;
			let result = subscribe(&client, &method, &unsubscribe, &params, count, format).await;
			client.close();
			result
		}
	}
}

/// Builds a client whose adapter matches the URL scheme.
pub fn build_client(node: &NodeArgs) -> Result<Client> {
	let timeout = node.timeout.map(Duration::from_secs);
	let credentials = node.user.as_deref().zip(node.password.as_deref());

	let client = match Scheme::of(&node.url)? {
		Scheme::Http => {
			let mut builder = HttpAdapter::builder().target(node.url.as_str());
			if let Some((user, password)) = credentials {
				builder = builder.basic_auth(user, password);
			}
			if let Some(timeout) = timeout {
				builder = builder.timeout(timeout);
			}
			let adapter = builder.build().context("Failed to create HTTP client")?;
			Client::builder().call_adapter(adapter).build()
		}
		Scheme::WebSocket => {
			let mut builder = DuplexAdapter::builder().target(node.url.as_str());
			if let Some((user, password)) = credentials {
				builder = builder.basic_auth(user, password);
			}
			if let Some(timeout) = timeout {
				builder = builder.request_timeout(timeout);
			}
			Client::builder().duplex(builder.build()).build()
		}
	};
	Ok(client)
}

async fn call(client: &Client, method: &str, params: &[String]) -> Result<Value> {
	let call = RpcCall::<Value>::new(method).params(params.iter().map(|p| parse_param(p)).collect());
	info!(target = "jrpc.cli", method, "calling");
	client
		.execute(call)
		.await
		.with_context(|| format!("Call to {method} failed"))
}

async fn subscribe(
	client: &Client,
	method: &str,
	unsubscribe: &str,
	params: &[String],
	count: Option<usize>,
	format: OutputFormat,
) -> Result<()> {
	let call = SubscribeCall::<Value>::new(method, unsubscribe)?
		.params(params.iter().map(|p| parse_param(p)).collect());
	let subscription = client
		.subscribe(call)
		.await
		.with_context(|| format!("Subscribe via {method} failed"))?;
	info!(target = "jrpc.cli", subscription = subscription.id(), "subscribed");

	let (tx, mut events) = mpsc::unbounded_channel();
	subscription.set_handler(move |event| {
		let _ = tx.send(event);
	});

	let mut received = 0usize;
	let outcome = loop {
		if count.is_some_and(|limit| received >= limit) {
			break Ok(());
		}
		tokio::select! {
			event = events.recv() => match event {
				Some(event) => {
					received += 1;
					if let Err(e) = print_value(&event.value, format) {
						break Err(e);
					}
				}
				None => break Err(anyhow::anyhow!("Subscription ended: connection lost")),
			},
			_ = tokio::signal::ctrl_c() => {
				info!(target = "jrpc.cli", "received Ctrl+C, unsubscribing");
				break Ok(());
			}
		}
	};

	if let Err(e) = subscription.close().await {
		warn!(target = "jrpc.cli", error = %e, "unsubscribe failed");
	}
	outcome
}

fn print_value(value: &Value, format: OutputFormat) -> Result<()> {
	let text = match format {
		OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
		OutputFormat::Json => serde_json::to_string(value)?,
	};
	let mut stdout = io::stdout().lock();
	writeln!(stdout, "{text}").context("Failed to write output")?;
	stdout.flush().context("Failed to write output")
}
