use std::env;

use tracing_subscriber::EnvFilter;

use exam_presence::api::{presence_routes, SocketSettings};
use exam_presence::config::Config;
use exam_presence::directory::StaticDirectory;
use exam_presence::error::{PresenceError, Result};
use exam_presence::presence::{PresenceHandle, PresenceService};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Presence server failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;

    let directory = match &config.presence.user_directory_path {
        Some(path) => StaticDirectory::from_json_file(path)?,
        None => StaticDirectory::empty(),
    };
    let handle = PresenceHandle::spawn(PresenceService::new(Box::new(directory)));

    let settings = SocketSettings {
        ping_interval: config.server.ping_interval,
        ping_timeout: config.server.ping_timeout,
    };
    let routes = presence_routes::presence_routes(handle.clone(), settings);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.bind_address(), async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .map_err(|e| PresenceError::internal(format!("bind failed: {}", e)))?;

    tracing::info!(address = %addr, "Presence server listening");
    server.await;

    if let Err(e) = handle.shutdown().await {
        tracing::warn!(error = %e, "Presence dispatcher already stopped");
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = matches!(env::var("LOG_FORMAT").ok().as_deref(), Some("json") | Some("JSON"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
