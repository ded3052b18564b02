//! boltsocks server binary

use anyhow::{Context, Result};
use boltsocks::server::{Server, ServerConfig};
use boltsocks::util::set_custom_dns_servers;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let mut config = ServerConfig::default();
    let mut dns_servers: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-l" | "--listen" => {
                config.host = args.next().context("Expected host after -l")?;
            }
            "-p" | "--port" => {
                config.port = args
                    .next()
                    .context("Expected port after -p")?
                    .parse()
                    .context("Invalid port")?;
            }
            "--backlog" => {
                config.backlog = args
                    .next()
                    .context("Expected value after --backlog")?
                    .parse()
                    .context("Invalid backlog")?;
            }
            "--keepalive" => {
                let secs: u64 = args
                    .next()
                    .context("Expected seconds after --keepalive")?
                    .parse()
                    .context("Invalid keepalive period")?;
                config.keepalive_idle = Duration::from_secs(secs);
            }
            "--buffer-size" => {
                config.buffer_size = args
                    .next()
                    .context("Expected bytes after --buffer-size")?
                    .parse()
                    .context("Invalid buffer size")?;
            }
            "--dns" => {
                let raw = args.next().context("Expected servers after --dns")?;
                dns_servers = raw.split(',').map(|s| s.to_string()).collect();
            }
            "-h" | "--help" => {
                println!("Usage: boltsocks [OPTIONS]");
                println!("Options:");
                println!("  -l, --listen HOST        Bind host (default: 127.0.0.1)");
                println!("  -p, --port PORT          Listen port (default: 8789)");
                println!("      --backlog N          Listen backlog (default: 256)");
                println!("      --keepalive SECS     TCP keep-alive idle period (default: 60)");
                println!("      --buffer-size BYTES  Per-direction relay buffer (default: 2048)");
                println!("      --dns SERVERS        Comma-separated custom DNS servers");
                println!("  -h, --help               Show this help message");
                return Ok(());
            }
            _ => {
                error!("Unknown argument: {}", arg);
                return Err(anyhow::anyhow!("Unknown argument: {}", arg));
            }
        }
    }

    if !dns_servers.is_empty() {
        set_custom_dns_servers(&dns_servers)
            .await
            .context("Failed to configure DNS servers")?;
    }

    info!("[Server] boltsocks v{}", env!("CARGO_PKG_VERSION"));

    let server = Server::bind(config).await.context("Failed to start server")?;

    tokio::select! {
        result = server.serve() => result.context("Server terminated")?,
        _ = tokio::signal::ctrl_c() => {
            info!("[Server] Received shutdown signal, exiting");
        }
    }

    Ok(())
}
