use anyhow::Result;
use bruteguard_core::{GuardError, ListKind, ServiceConfig, Subnet, SubnetRepository};
use bruteguard_db::Database;

use crate::SubnetCommands;

pub async fn handle(config: &ServiceConfig, list_kind: ListKind, command: SubnetCommands) -> Result<()> {
    let db = Database::new(&config.database_url).await?;

    match command {
        SubnetCommands::List => list(&db, list_kind).await?,
        SubnetCommands::Add { cidr } => add(&db, list_kind, cidr).await?,
        SubnetCommands::Remove { cidr } => remove(&db, list_kind, cidr).await?,
    }

    db.close().await;
    Ok(())
}

async fn list(db: &Database, list_kind: ListKind) -> Result<()> {
    let subnets = db.list_by_kind(list_kind).await?;

    if subnets.is_empty() {
        println!("No subnets in {}.", list_kind);
        return Ok(());
    }

    println!("\n{}", list_kind);
    println!("{}", "-".repeat(40));
    for subnet in subnets {
        println!("{}", subnet.cidr);
    }

    println!();
    Ok(())
}

async fn add(db: &Database, list_kind: ListKind, cidr: String) -> Result<()> {
    let cidr = cidr.trim();
    if cidr.is_empty() {
        anyhow::bail!("CIDR must not be empty");
    }

    db.create(&Subnet::new(list_kind, cidr)).await?;
    println!("Added {} to {}", cidr, list_kind);
    println!("Running servers apply it after their next cache refresh.");
    Ok(())
}

async fn remove(db: &Database, list_kind: ListKind, cidr: String) -> Result<()> {
    match db.delete(list_kind, cidr.trim()).await {
        Ok(()) => {
            println!("Removed {} from {}", cidr.trim(), list_kind);
            Ok(())
        }
        Err(GuardError::SubnetNotFound { .. }) => {
            anyhow::bail!("{} is not in {}", cidr.trim(), list_kind)
        }
        Err(e) => Err(e.into()),
    }
}
