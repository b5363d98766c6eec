// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use error_stack::ResultExt as _;
use flowlane_state::{Result, StateError};
use sqlx::{Row as _, SqlitePool};

/// Run migrations to set up the database schema
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    apply_migration(pool, "001_create_schema", || create_schema(pool)).await?;
    apply_migration(pool, "002_add_queue_indexes", || add_queue_indexes(pool)).await?;

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    let sql = r#"
        CREATE TABLE IF NOT EXISTS _flowlane_migrations (
            name TEXT PRIMARY KEY,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
    "#;

    sqlx::query(sql)
        .execute(pool)
        .await
        .change_context(StateError::Initialization)?;

    Ok(())
}

/// Apply a migration if it hasn't been applied yet
async fn apply_migration<F, Fut>(pool: &SqlitePool, name: &str, migration_fn: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let row = sqlx::query("SELECT COUNT(*) as count FROM _flowlane_migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .change_context(StateError::Initialization)?;

    let count: i64 = row
        .try_get("count")
        .change_context(StateError::Initialization)?;
    if count > 0 {
        return Ok(());
    }

    log::debug!("applying migration {name}");
    migration_fn()
        .await
        .attach_printable_lazy(|| format!("migration: {name}"))?;

    sqlx::query("INSERT INTO _flowlane_migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .change_context(StateError::Initialization)?;

    Ok(())
}

async fn execute_all(pool: &SqlitePool, commands: &[&str]) -> Result<()> {
    for sql in commands {
        sqlx::query(sql)
            .execute(pool)
            .await
            .change_context(StateError::Initialization)
            .attach_printable_lazy(|| sql.trim().to_string())?;
    }
    Ok(())
}

/// Timestamps are stored as milliseconds since the Unix epoch so that claim
/// order and lease expiry compare as integers.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let table_commands = [
        r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                definition_json TEXT NOT NULL
            )
        "#,
        r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                spec_json TEXT NOT NULL
            )
        "#,
        // `version` guards read-modify-write patches.
        r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at_ms INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )
        "#,
        r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                lease_owner TEXT,
                lease_expires_at_ms INTEGER,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )
        "#,
        r#"
            CREATE TABLE IF NOT EXISTS run_events (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                ts_ms INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                event_json TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            )
        "#,
        r#"
            CREATE TABLE IF NOT EXISTS persistent_vars (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL
            )
        "#,
    ];
    execute_all(pool, &table_commands).await
}

async fn add_queue_indexes(pool: &SqlitePool) -> Result<()> {
    let index_commands = [
        "CREATE INDEX IF NOT EXISTS idx_queue_claim ON queue_items(status, priority DESC, created_at_ms, id)",
        "CREATE INDEX IF NOT EXISTS idx_queue_lease_owner ON queue_items(lease_owner)",
        "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status, created_at_ms)",
    ];
    execute_all(pool, &index_commands).await
}
