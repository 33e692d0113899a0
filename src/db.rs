use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY,
        campaign_id TEXT NOT NULL,
        source_platform TEXT NOT NULL,
        source_url TEXT NOT NULL,
        place_id TEXT,
        name TEXT NOT NULL,
        address TEXT,
        emails JSONB NOT NULL DEFAULT '[]',
        phones JSONB NOT NULL DEFAULT '[]',
        whatsapp TEXT,
        website TEXT,
        social_links JSONB NOT NULL DEFAULT '{}',
        description TEXT,
        lead_score SMALLINT NOT NULL DEFAULT 0 CHECK (lead_score BETWEEN 0 AND 100),
        contact_source TEXT NOT NULL DEFAULT 'scrape_only',
        kpis JSONB NOT NULL DEFAULT '{}',
        raw_snippet TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (campaign_id, source_url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS generated_messages (
        id UUID PRIMARY KEY,
        lead_id UUID NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
        channel TEXT NOT NULL,
        recipient TEXT NOT NULL,
        subject TEXT,
        body TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        sent_at TIMESTAMPTZ,
        error TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS generated_messages_one_pending
        ON generated_messages (lead_id, channel) WHERE status = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_log (
        id BIGSERIAL PRIMARY KEY,
        message_id UUID NOT NULL,
        lead_id UUID NOT NULL,
        channel TEXT NOT NULL,
        recipient TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        error TEXT,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Idempotent table bootstrap.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema verified");
        Ok(())
    }
}
