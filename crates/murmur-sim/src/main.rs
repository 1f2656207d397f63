//! Murmur smoke binary.
//!
//! Runs a scripted session through the channel manager against the
//! simulated backend and logs every channel notification.
//!
//! # Usage
//!
//! ```bash
//! murmur-sim --protocol jabber --account me@example.com --log-level debug
//! murmur-sim --no-typing --send-failure-rate 0.5 --seed 7
//! ```

use clap::Parser;
use murmur_bridge::{BridgeConfig, ChannelManager};
use murmur_harness::{SimBackend, SimBackendConfig, run_scripted_session};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Murmur channel bridge
#[derive(Parser, Debug)]
#[command(name = "murmur-sim")]
#[command(about = "Run a scripted Murmur channel session against a simulated backend")]
#[command(version)]
struct Args {
    /// Backend protocol name
    #[arg(long, default_value = "sim")]
    protocol: String,

    /// Account name
    #[arg(long, default_value = "me@example.com")]
    account: String,

    /// Contact name of the local user (defaults to the account name)
    #[arg(long)]
    self_id: Option<String>,

    /// Seconds after which typing announcements are repeated (0 disables)
    #[arg(long, default_value = "30")]
    typing_timeout: u32,

    /// Simulate a protocol without typing notifications
    #[arg(long)]
    no_typing: bool,

    /// Probability that a send fails
    #[arg(long, default_value = "0.0")]
    send_failure_rate: f64,

    /// Seed for failure injection
    #[arg(long, default_value = "24301")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if !(0.0..=1.0).contains(&args.send_failure_rate) {
        return Err(format!("--send-failure-rate must be within [0, 1], got {}", args.send_failure_rate).into());
    }

    let mut config = BridgeConfig::new(args.protocol, args.account);
    if let Some(self_id) = args.self_id {
        config.self_id = self_id;
    }

    let backend = SimBackend::new(SimBackendConfig {
        typing_supported: !args.no_typing,
        typing_timeout_secs: args.typing_timeout,
        send_failure_rate: args.send_failure_rate,
        seed: args.seed,
        ..SimBackendConfig::default()
    });

    tracing::info!(connection = %config.connection_path(), "Murmur bridge starting");

    let mut manager = ChannelManager::new(backend.clone(), config)?;
    let log = run_scripted_session(&backend, &mut manager)?;

    tracing::info!(
        events = log.events().len(),
        sent = backend.sent_messages().len(),
        "session finished"
    );

    Ok(())
}
