use anyhow::{Context, Result};
use bruteguard_core::{AuthRequest, ServiceConfig, VerdictReason};
use bruteguard_db::Database;
use bruteguard_engine::AdmissionController;
use std::sync::Arc;

/// Run one admission check the way the server would, consuming tokens.
pub async fn run(config: &ServiceConfig, login: String, password: String, ip: String) -> Result<()> {
    let db = Arc::new(Database::connect(&config.database_url).await?);
    let store = super::connect_store(config).await?;
    let controller = AdmissionController::from_config(config, db.clone(), store);

    let req = AuthRequest::new(login, password, ip);
    let verdict = controller
        .check_auth(&req)
        .await
        .context("Check failed; the attempt would be denied")?;

    let reason = match verdict.reason {
        VerdictReason::Blacklisted => "ip is blacklisted".to_string(),
        VerdictReason::Whitelisted => "ip is whitelisted".to_string(),
        VerdictReason::WithinLimits => "within rate limits".to_string(),
        VerdictReason::RateLimited { dimension } => format!("{} limit exceeded", dimension),
    };
    println!(
        "{} ({})",
        if verdict.ok { "ALLOW" } else { "DENY" },
        reason
    );

    db.close().await;
    Ok(())
}
