//! Identity service command.

use anyhow::Result;

use super::{load_config, shutdown_signal};
use crate::ui;

/// Command-line overrides for `identity run`.
pub struct RunArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Run the identity service until a shutdown signal arrives.
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config()?.identity;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    ui::header("Keyward Identity Service");
    ui::kv("Address", &format!("{}:{}", config.bind_address, config.port));
    ui::kv("Issuer", &config.token_issuer);
    ui::kv("Data", &config.data_dir().display().to_string());
    println!();
    ui::info("Press Ctrl+C to stop");

    keyward_identity::start(config, shutdown_signal()).await?;

    ui::success("Identity service stopped");
    Ok(())
}
