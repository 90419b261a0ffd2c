use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Node used when neither `--url` nor `JRPC_URL` is given.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:9944";

/// Output format for results and events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Indented JSON
	#[default]
	Pretty,
	/// One JSON document per line
	Json,
}

fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "jrpc")]
#[command(about = "JSON-RPC client - calls and subscriptions over HTTP or WebSocket")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: pretty (default) or json
	#[arg(short = 'f', long, global = true, value_enum, default_value = "pretty")]
	pub format: OutputFormat,

	#[command(flatten)]
	pub node: NodeArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Where and how to reach the node.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
	/// Node URL; http(s):// for single calls, ws(s):// for calls and subscriptions
	#[arg(long, short = 'u', global = true, env = "JRPC_URL", default_value = DEFAULT_URL)]
	pub url: String,

	/// Basic auth username
	#[arg(long, global = true, requires = "password")]
	pub user: Option<String>,

	/// Basic auth password
	#[arg(long, global = true, env = "JRPC_PASSWORD", hide_env_values = true, requires = "user")]
	pub password: Option<String>,

	/// Per-request timeout in seconds
	#[arg(long, global = true, value_name = "SECS")]
	pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Call a method and print its result
	Call {
		/// Method name, e.g. chain_getFinalisedHead
		method: String,
		/// Positional params; each is parsed as JSON, or taken as a string
		params: Vec<String>,
	},

	/// Subscribe and print events as they arrive
	#[command(alias = "sub")]
	Subscribe {
		/// Subscribe method, e.g. chain_subscribeFinalizedHeads
		method: String,
		/// Unsubscribe method, e.g. chain_unsubscribeFinalizedHeads
		unsubscribe: String,
		/// Positional params; each is parsed as JSON, or taken as a string
		params: Vec<String>,
		/// Stop after this many events (runs until Ctrl+C when omitted)
		#[arg(short = 'n', long, value_name = "N")]
		count: Option<usize>,
	},
}
