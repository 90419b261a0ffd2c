use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
///
/// Quiet by default so only results reach the terminal. `-v` surfaces the
/// cli's progress and runtime warnings such as dropped events; `-vv` adds
/// per-frame traffic and connection state changes.
pub fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error",
		1 => "info,jrpc_runtime=warn",
		_ => "debug",
	}
}

/// Installs the stderr subscriber; stdout carries only results and events.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(verbosity > 1)
		.compact()
		.init();
}
