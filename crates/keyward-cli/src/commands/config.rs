//! Config show/validate commands.

use anyhow::Result;
use keyward_core::Config;
use keyward_identity::Argon2Hasher;

use super::load_config;
use crate::ui;

/// Print the effective configuration. The signing secret is reported only as
/// present or missing.
pub fn show(json: bool) -> Result<()> {
    let config = load_config()?;
    let secret_status = secret_status(&config);

    if json {
        let mut value = serde_json::to_value(&config)?;
        if let Some(identity) = value.get_mut("identity").and_then(|v| v.as_object_mut()) {
            identity.insert("jwtSecret".to_string(), secret_status.into());
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    ui::header("Configuration");
    ui::kv("File", &Config::default_path().display().to_string());

    let identity = &config.identity;
    ui::header("Identity");
    ui::kv("Address", &format!("{}:{}", identity.bind_address, identity.port));
    ui::kv("Data dir", &identity.data_dir().display().to_string());
    ui::kv("JWT secret", secret_status);
    ui::kv("Issuer", &identity.token_issuer);
    ui::kv("Access TTL", &format!("{}s", identity.access_token_ttl_secs));
    ui::kv("Refresh TTL", &format!("{}s", identity.refresh_token_ttl_secs));
    ui::kv("Request timeout", &format!("{}ms", identity.request_timeout_ms));
    ui::kv(
        "Password hash",
        &format!(
            "m={} t={} p={}",
            identity.password_hash.memory_kib,
            identity.password_hash.iterations,
            identity.password_hash.parallelism
        ),
    );

    let gateway = &config.gateway;
    ui::header("Gateway");
    ui::kv("Address", &format!("{}:{}", gateway.bind_address, gateway.port));
    ui::kv("Identity URL", &gateway.identity_url);
    ui::kv("Auth timeout", &format!("{}ms", gateway.auth_timeout_ms));
    ui::kv("Connect timeout", &format!("{}ms", gateway.connect_timeout_ms));

    Ok(())
}

/// Validate both components. Fails if either would refuse to start.
pub fn validate() -> Result<()> {
    let config = load_config()?;
    let mut failures = 0;

    ui::header("Validating configuration");

    match config
        .identity
        .validate()
        .map_err(anyhow::Error::from)
        .and_then(|()| Ok(Argon2Hasher::new(config.identity.password_hash)?))
    {
        Ok(_) => ui::success("Identity configuration is valid"),
        Err(e) => {
            ui::error(&format!("Identity: {e}"));
            failures += 1;
        }
    }

    match config.gateway.validate() {
        Ok(()) => ui::success("Gateway configuration is valid"),
        Err(e) => {
            ui::error(&format!("Gateway: {e}"));
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} configuration section(s) invalid");
    }
    Ok(())
}

fn secret_status(config: &Config) -> &'static str {
    match config.identity.jwt_secret.as_deref() {
        Some(secret) if !secret.trim().is_empty() => "[set]",
        _ => "[missing]",
    }
}
