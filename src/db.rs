use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the CRM schema and aggregate tables if they do not exist.
    ///
    /// Leads and users are stored as whole JSONB aggregates; `version` on
    /// leads is the optimistic-concurrency token checked by the storage
    /// layer on every coordinated write.
    async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS crm")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm.leads (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                version BIGINT NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm.users (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}
