use async_trait::async_trait;
use bruteguard_core::*;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and make sure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = Self::connect(database_url).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Connect without touching the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subnets (
                list_type TEXT NOT NULL CHECK (list_type IN ('blacklist', 'whitelist')),
                cidr TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (list_type, cidr)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SubnetRepository for Database {
    async fn create(&self, subnet: &Subnet) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO subnets (list_type, cidr)
            VALUES ($1, $2)
            ON CONFLICT (list_type, cidr) DO NOTHING
            "#,
        )
        .bind(subnet.list_kind.as_str())
        .bind(&subnet.cidr)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Subnet {} already present in {}", subnet.cidr, subnet.list_kind);
        }

        Ok(())
    }

    async fn delete(&self, list_kind: ListKind, cidr: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM subnets WHERE list_type = $1 AND cidr = $2")
            .bind(list_kind.as_str())
            .bind(cidr)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GuardError::SubnetNotFound {
                list: list_kind,
                cidr: cidr.to_string(),
            });
        }

        Ok(())
    }

    async fn list_by_kind(&self, list_kind: ListKind) -> Result<Vec<Subnet>> {
        let rows = sqlx::query_as::<_, SubnetRow>(
            "SELECT list_type, cidr FROM subnets WHERE list_type = $1 ORDER BY cidr",
        )
        .bind(list_kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subnet::try_from).collect()
    }
}

// Row structure for PostgreSQL
#[derive(sqlx::FromRow)]
struct SubnetRow {
    list_type: String,
    cidr: String,
}

impl TryFrom<SubnetRow> for Subnet {
    type Error = GuardError;

    fn try_from(row: SubnetRow) -> std::result::Result<Self, Self::Error> {
        let list_kind = row.list_type.parse::<ListKind>().map_err(|_| {
            sqlx::Error::Decode(format!("unknown list_type in subnets table: {}", row.list_type).into())
        })?;

        Ok(Subnet {
            list_kind,
            cidr: row.cidr,
        })
    }
}
