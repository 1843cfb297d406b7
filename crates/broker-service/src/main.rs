//! Main entry point for the escrow broker service.
//!
//! This binary assembles the broker engine from configuration and drives it
//! over a line-oriented transport stand-in: each stdin line is
//! `<handle>: <message>`, decoded once into a typed command and dispatched
//! into the core. The background sweeper runs alongside until Ctrl+C.

use clap::Parser;
use broker_config::Config;
use broker_core::{BrokerBuilder, BrokerEngine, EngineError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

mod commands;
mod dispatch;

// Import implementations from individual crates
use broker_notify::implementations::log::create_notifier as create_log_notifier;
use broker_storage::implementations::file::create_storage as create_file_storage;
use broker_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the broker service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the broker service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the broker engine with all implementations
/// 5. Runs the engine and the transport until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt().with_env_filter(env_filter).with_target(true).init();

	tracing::info!("Started broker");

	// Load configuration
	let config = Config::from_file(args.config.to_str().unwrap()).await?;
	tracing::info!("Loaded configuration [{}]", config.broker.id);

	// Build broker engine with implementations
	let engine = Arc::new(build_broker(config)?);

	// Run the sweeper loop and the transport concurrently
	let transport_engine = Arc::clone(&engine);
	tokio::select! {
		result = engine.run() => {
			tracing::info!("Engine finished");
			result?;
		}
		result = run_transport(transport_engine) => {
			tracing::info!("Transport closed");
			result?;
		}
	}

	tracing::info!("Stopped broker");
	Ok(())
}

/// Builds the broker engine with the storage and notifier implementations.
fn build_broker(config: Config) -> Result<BrokerEngine, EngineError> {
	BrokerBuilder::new(config)
		.with_storage_factory("memory", create_memory_storage)
		.with_storage_factory("file", create_file_storage)
		.with_notify_factory("log", create_log_notifier)
		.build()
}

/// Reads `<handle>: <message>` lines from stdin and prints the replies.
///
/// This is the transport stand-in: a real chat transport would feed the
/// same (handle, message) pairs into [`dispatch::handle_line`].
async fn run_transport(engine: Arc<BrokerEngine>) -> std::io::Result<()> {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut stdout = tokio::io::stdout();

	while let Some(line) = lines.next_line().await? {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		let Some((handle, message)) = line.split_once(':') else {
			stdout.write_all(b"Use: <handle>: <message>\n").await?;
			continue;
		};
		let handle = handle.trim();
		let reply = dispatch::handle_line(&engine, handle, message.trim()).await;
		stdout
			.write_all(format!("[{}] {}\n", handle, reply).as_bytes())
			.await?;
		stdout.flush().await?;
	}
	Ok(())
}
