use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Repositories are owned by other services, runs only reference them
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id BIGSERIAL PRIMARY KEY,
            organization_id BIGINT NOT NULL,
            product_id BIGINT NOT NULL,
            type VARCHAR(50) NOT NULL,
            url TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ort_runs (
            id BIGSERIAL PRIMARY KEY,
            index BIGINT NOT NULL,
            repository_id BIGINT NOT NULL REFERENCES repositories(id),
            revision VARCHAR(255) NOT NULL,
            path TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ,
            job_configs JSONB NOT NULL DEFAULT '{}',
            resolved_job_configs JSONB,
            resolved_job_config_context TEXT,
            status VARCHAR(50) NOT NULL,
            labels JSONB NOT NULL DEFAULT '{}',
            issues JSONB NOT NULL DEFAULT '[]',
            trace_id VARCHAR(255),
            UNIQUE (repository_id, index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One job per stage and run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id BIGSERIAL PRIMARY KEY,
            ort_run_id BIGINT NOT NULL REFERENCES ort_runs(id) ON DELETE CASCADE,
            stage VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            configuration JSONB NOT NULL DEFAULT '{}',
            status VARCHAR(50) NOT NULL,
            UNIQUE (ort_run_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ort_runs_status ON ort_runs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_stage_status ON jobs(stage, status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
