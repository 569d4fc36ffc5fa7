use anyhow::{Context, Result};
use bruteguard_core::ServiceConfig;
use bruteguard_db::Database;

pub async fn run(config: &ServiceConfig) -> Result<()> {
    let db = Database::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    db.run_migrations()
        .await
        .context("Failed to run migrations")?;
    println!("Migrations applied.");

    db.close().await;
    Ok(())
}
