use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

pub mod config;
use config::app_config::{ConfigSource, load_config, setup_resolver, setup_tls_connector};
use config::probe_config::ProbeConfig;
pub mod output;
use output::{render_json, render_text};
pub mod ws_probe;
use ws_probe::{prelude::*, report};

/// Exit code for configuration problems found after argument parsing.
const CONFIG_ERROR_EXIT: u8 = 1;

/// Check that a WebSocket endpoint accepts a connection, takes a fixed
/// sequence of text messages and closes cleanly within a deadline.
#[derive(Debug, Parser)]
#[command(name = "wsprobe", version, about)]
struct Args {
    /// Endpoint to probe, e.g. ws://0.0.0.0:3333 or wss://example.com/socket
    url: Option<String>,

    /// Message to send once the connection is open. Repeat to send several, in order
    #[arg(short, long = "message", value_name = "TEXT")]
    messages: Vec<String>,

    /// Maximum probe lifetime in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Milliseconds to listen for an early close after the handshake,
    /// before the first message is sent
    #[arg(short, long)]
    grace_ms: Option<u64>,

    /// Close the connection ourselves after this many quiet milliseconds
    /// following the last send, instead of waiting for the server to close
    #[arg(short, long)]
    settle_ms: Option<u64>,

    /// YAML config file (defaults to $CONFIG_FILE, then wsprobe.yml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,

    /// DNS server to resolve the host with. Repeat or comma-separate for several
    #[arg(long = "dns-host", value_name = "IP", value_delimiter = ',')]
    dns_hosts: Vec<String>,

    /// Print the result as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl Args {
    /// The command line as the topmost configuration layer. Flags that were
    /// not given leave the lower layers untouched.
    fn config_layer(&self) -> ProbeConfig {
        ProbeConfig {
            url: self.url.clone(),
            timeout_ms: self.timeout_ms,
            grace_ms: self.grace_ms,
            settle_ms: self.settle_ms,
            messages: (!self.messages.is_empty()).then(|| self.messages.clone()),
            insecure: self.insecure.then_some(true),
            dns_hosts: (!self.dns_hosts.is_empty()).then(|| self.dns_hosts.clone()),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let source = ConfigSource::locate(args.config.clone());

    let app = match load_config(&source, args.config_layer()) {
        Ok(app) => app,
        Err(e) => {
            error!("{}", report(&e));
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let connector = match setup_tls_connector(app.insecure) {
        Ok(connector) => connector,
        Err(e) => {
            error!("{}", report(&e));
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };
    let resolver = match setup_resolver(&app.dns_hosts) {
        Ok(resolver) => resolver,
        Err(e) => {
            error!("{}", report(&e));
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let result = probe_endpoint(
        &app.endpoint,
        &app.messages,
        &app.options,
        &connector,
        &resolver,
    )
    .await;

    if args.json {
        match render_json(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize probe result: {}", report(&e)),
        }
    } else {
        println!("{}", render_text(&result));
    }

    ExitCode::from(result.exit_code())
}
