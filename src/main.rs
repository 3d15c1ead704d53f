use clap::Parser;
use stompmq::{BrokerConfig, ReactorServer, Result};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stompmq")]
#[command(about = "A STOMP-style text-protocol message broker written in Rust")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value = "7777")]
    port: u16,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of worker lanes processing protocol work.
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Read buffer allocation size in bytes.
    #[arg(long, default_value = "8192")]
    buffer_size: usize,

    /// Protocol version accepted in CONNECT frames.
    #[arg(long, default_value = "1.2")]
    accept_version: String,

    /// Virtual host accepted in CONNECT frames.
    #[arg(long, default_value = "stomp.cs.bgu.ac.il")]
    vhost: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    info!("Starting stompmq broker on {}:{}", args.host, args.port);
    info!("Worker lanes: {}", args.workers);
    info!("Accepted protocol version: {}", args.accept_version);
    info!("Virtual host: {}", args.vhost);

    let config = BrokerConfig {
        host: args.host,
        port: args.port,
        num_workers: args.workers,
        buffer_size: args.buffer_size,
        supported_version: args.accept_version,
        valid_host: args.vhost,
    };

    let server = ReactorServer::bind(config)?;
    server.run()
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
