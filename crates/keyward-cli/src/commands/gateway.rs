//! Gateway command.

use anyhow::Result;

use super::{load_config, shutdown_signal};
use crate::ui;

/// Command-line overrides for `gateway run`.
pub struct RunArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
    /// Identity service URL override.
    pub identity_url: Option<String>,
}

/// Run the edge gateway until a shutdown signal arrives.
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config()?.gateway;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(url) = args.identity_url {
        config.identity_url = url;
    }

    ui::header("Keyward Gateway");
    ui::kv("Address", &format!("{}:{}", config.bind_address, config.port));
    ui::kv("Identity", &config.identity_url);
    ui::kv("Auth timeout", &format!("{}ms", config.auth_timeout_ms));
    println!();
    ui::info("Press Ctrl+C to stop");

    keyward_gateway::start(config, shutdown_signal()).await?;

    ui::success("Gateway stopped");
    Ok(())
}
