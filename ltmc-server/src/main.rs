//! ABOUTME: MCP stdio server entry point for the LTMC memory service
//! ABOUTME: Stream hygiene is the load-bearing constraint here — stdout is protocol-only (spec §4.7)

mod bootstrap;
mod dispatch;

use anyhow::{Context, Result};
use tracing::info;

use dispatch::LtmcServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Config loading touches only toml/serde/env — no dependency here can
    // write to stdout, so it is safe to run before logging is installed.
    // Everything after this line (migrations, the vector index, the graph
    // and cache backends) can, so logging must be wired before any of it runs.
    let config = ltmc_config::LtmcConfig::load().context("loading configuration")?;

    let _log_guard = init_logging(&config)?;
    info!(data_dir = %config.data_dir, "starting ltmc-server");

    let services = bootstrap::bootstrap(&config).await.context("bootstrap failed")?;

    let server = LtmcServer::new(services.coordinator, services.retrieval);

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport)
        .await
        .context("starting MCP stdio server")?;
    service.waiting().await.context("MCP server loop")?;

    Ok(())
}

/// Installs a stderr + log-file subscriber. Returns the
/// [`tracing_appender::non_blocking::WorkerGuard`] the caller must hold for
/// the process lifetime — dropping it early silently stops log delivery.
fn init_logging(config: &ltmc_config::LtmcConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = std::path::Path::new(&config.log_file);
    let dir = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir).context("creating log directory")?;
    let file_name = log_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("ltmc.log");
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let level = config.log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(non_blocking)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing global tracing subscriber")?;

    Ok(guard)
}
