use anyhow::Result;
use bruteguard_core::{ResetRequest, ServiceConfig};
use bruteguard_engine::{RateLimiter, SystemClock};
use std::sync::Arc;

pub async fn run(config: &ServiceConfig, login: Option<String>, ip: Option<String>) -> Result<()> {
    let req = ResetRequest { login, ip };
    if req.login().is_none() && req.ip().is_none() {
        anyhow::bail!("Pass --login, --ip or both");
    }

    let store = super::connect_store(config).await?;
    let limiter = RateLimiter::new(store, Arc::new(SystemClock), config.limits);
    limiter.reset_buckets(req.login(), req.ip()).await?;

    if let Some(login) = req.login() {
        println!("Reset login bucket for {}", login);
    }
    if let Some(ip) = req.ip() {
        println!("Reset IP bucket for {}", ip);
    }
    Ok(())
}
