mod cli;

use anyhow::Context;
use clap::Parser;
use cli::args::Arguments;
use log::{error, info, LevelFilter};
use mcdn::config::Config;
use mcdn::core::node::NodeBuilder;
use mcdn::networking::http_api;
use mcdn::utils::logging::init_logging;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Arguments::parse();

    // Initialize logging based on verbosity
    if args.verbose {
        init_logging(LevelFilter::Info);
    } else {
        init_logging(LevelFilter::Warn);
    }

    let mut config = Config::parse_from_file(&args.config).map_err(|e| {
        error!(
            "Failed to read configuration file '{}': {}",
            args.config.display(),
            e
        );
        e
    })?;
    if let Some(udp_port) = args.udp_port {
        config.udp_port = udp_port;
    }
    if let Some(storage) = args.storage {
        config.storage_path = storage;
    }

    let shutdown = CancellationToken::new();
    let http_bind = config.http_bind;
    let node = NodeBuilder::new(config)
        .shutdown(shutdown.clone())
        .build()
        .await
        .map_err(|e| {
            error!("Failed to create node: {:#}", e);
            e
        })?;

    // Begin listening for existence queries and start the background cycle
    let listener_task = node.start_listening();
    let sync_task = node.start_directory_sync();
    info!(
        "Your node {} is listening for queries at {}",
        node.identity(),
        node.udp_addr()?
    );

    // Spawn a task to handle shutdown signals.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(http_bind)
        .await
        .with_context(|| format!("Unable to bind HTTP listener on {}", http_bind))?;
    http_api::serve(listener, node.clone(), shutdown.clone()).await?;

    sync_task.stop().await;
    if let Err(e) = listener_task.await {
        error!("Existence query listener ended abnormally: {}", e);
    }
    info!("Saving registry snapshot...");
    if let Err(e) = node.shutdown().await {
        error!("Failed to save registry snapshot during shutdown: {:#}", e);
    }

    Ok(())
}
