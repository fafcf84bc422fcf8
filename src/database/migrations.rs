use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all pending migrations in version order
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if is_migration_applied(pool, version).await? {
            continue;
        }

        info!(version = version, name = name, "Applying migration");

        let mut tx = pool.begin().await?;
        // Plain string execution runs every statement of the script.
        (&mut *tx).execute(sql).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = version, name = name, "Migration applied successfully");
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// All migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxy_table", MIGRATION_001_PROXY),
        (2, "test_log_table", MIGRATION_002_TEST_LOG),
    ]
}

const MIGRATION_001_PROXY: &str = r#"
CREATE TABLE IF NOT EXISTS proxy (
    proxy_url VARCHAR(255) PRIMARY KEY,
    ip VARCHAR(64) NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    protocol VARCHAR(16) NOT NULL,
    local VARCHAR(64) NOT NULL,
    collect_time TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proxy_protocol ON proxy(protocol);
CREATE INDEX IF NOT EXISTS idx_proxy_collect_time ON proxy(collect_time DESC);
"#;

const MIGRATION_002_TEST_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS test_log (
    id BIGSERIAL PRIMARY KEY,
    proxy_url VARCHAR(255) NOT NULL,
    website_name VARCHAR(128) NOT NULL,
    website_url TEXT NOT NULL,
    response_elapsed DOUBLE PRECISION NOT NULL DEFAULT 0,
    transfer_elapsed DOUBLE PRECISION NOT NULL DEFAULT 0,
    transfer_size BIGINT NOT NULL DEFAULT 0,
    timeout_exception BOOLEAN NOT NULL DEFAULT FALSE,
    proxy_exception BOOLEAN NOT NULL DEFAULT FALSE,
    test_time TIMESTAMPTZ NOT NULL,
    job_time TIMESTAMPTZ NOT NULL,
    verification_ip BOOLEAN NOT NULL DEFAULT FALSE,
    response_head TEXT,
    response_body TEXT,
    exception TEXT
);

CREATE INDEX IF NOT EXISTS idx_test_log_proxy_url ON test_log(proxy_url);
CREATE INDEX IF NOT EXISTS idx_test_log_test_time ON test_log(test_time DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let migrations = get_migrations();
        let versions: Vec<i32> = migrations.iter().map(|(v, _, _)| *v).collect();

        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_schema_matches_record_columns() {
        use crate::models::{Proxy, TestOutcome};
        use crate::repository::TableRecord;

        for column in Proxy::COLUMNS {
            assert!(MIGRATION_001_PROXY.contains(&format!("\n    {} ", column)));
        }
        for column in TestOutcome::COLUMNS {
            assert!(MIGRATION_002_TEST_LOG.contains(&format!("\n    {} ", column)));
        }
    }
}
