//! CLI command implementations.

pub mod config;
pub mod gateway;
pub mod identity;

use keyward_core::Config;

/// Load the config file (or defaults) and apply `KEYWARD_*` overrides.
pub fn load_config() -> anyhow::Result<Config> {
    let path = Config::default_path();
    let config = Config::load_default()
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?;
    Ok(config.with_env_overrides()?)
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
