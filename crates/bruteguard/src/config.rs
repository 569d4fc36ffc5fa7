use anyhow::{Context, Result};
use bruteguard_core::ServiceConfig;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;

const ENV_PREFIX: &str = "BRUTEGUARD_";

pub async fn load_config(path: &Path) -> Result<ServiceConfig> {
    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let mut config: ServiceConfig =
        toml::from_str(&contents).context("Failed to parse configuration file")?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;

    Ok(config)
}

pub async fn save_config(path: &Path, config: &ServiceConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    fs::write(path, contents)
        .await
        .context("Failed to write configuration file")?;

    Ok(())
}

/// Apply `BRUTEGUARD_*` variables on top of the file contents.
///
/// `lookup` is `std::env::var` outside of tests.
pub fn apply_env_overrides<F>(config: &mut ServiceConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(url) = var("DATABASE_URL") {
        config.database_url = url;
    }
    if let Some(url) = var("REDIS_URL") {
        config.store.redis_url = url;
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(port) = var("HTTP_PORT") {
        config.http.port = parse_var("HTTP_PORT", &port)?;
    }
    if let Some(ttl) = var("CACHE_TTL_SECS") {
        config.cache.ttl_secs = parse_var("CACHE_TTL_SECS", &ttl)?;
    }
    if let Some(limit) = var("LOGIN_LIMIT") {
        config.limits.login.limit = parse_var("LOGIN_LIMIT", &limit)?;
    }
    if let Some(limit) = var("PASSWORD_LIMIT") {
        config.limits.password.limit = parse_var("PASSWORD_LIMIT", &limit)?;
    }
    if let Some(limit) = var("IP_LIMIT") {
        config.limits.ip.limit = parse_var("IP_LIMIT", &limit)?;
    }
    // One window for all three buckets.
    if let Some(window) = var("WINDOW_SECS") {
        let window_secs = parse_var("WINDOW_SECS", &window)?;
        config.limits.login.window_secs = window_secs;
        config.limits.password.window_secs = window_secs;
        config.limits.ip.window_secs = window_secs;
    }

    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {ENV_PREFIX}{name}: {value:?}"))
}
