//! Database schema migrations.
//!
//! All statements are `CREATE ... IF NOT EXISTS`, so running `intake init`
//! repeatedly is safe.
//!
//! # Tables
//!
//! | Table | Holds |
//! |-------|-------|
//! | `staged_items` | ingested rows awaiting publication, both kinds |
//! | `feed_items` | general news feed |
//! | `selected_items` | curated news published from staging |
//! | `case_items` | case-study archive |
//!
//! The three published tables share one column layout. `external_id` is
//! indexed but deliberately not unique: duplicate prevention is done by
//! identity resolution before each write.

use anyhow::Result;
use sqlx::SqlitePool;

use content_intake_core::models::PublishTarget;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::published_table;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            external_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            source_url TEXT,
            source_site TEXT,
            author_name TEXT,
            author_email TEXT,
            employee_number TEXT,
            image_url TEXT,
            attributes_json TEXT NOT NULL DEFAULT '{}',
            published_at TEXT,
            uploaded_at INTEGER NOT NULL,
            uploaded_by TEXT NOT NULL,
            is_published INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_staged_kind_uploaded ON staged_items(kind, uploaded_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_staged_source_url ON staged_items(source_url)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_staged_external_id ON staged_items(external_id)")
        .execute(pool)
        .await?;

    for target in PublishTarget::ALL {
        let table = published_table(target);
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                external_id TEXT NOT NULL,
                staged_id TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                source_url TEXT,
                source_site TEXT,
                author_name TEXT,
                author_email TEXT,
                employee_number TEXT,
                image_url TEXT,
                attributes_json TEXT NOT NULL DEFAULT '{{}}',
                published_at TEXT NOT NULL,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                imported_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        );
        sqlx::query(&create).execute(pool).await?;

        for column in ["external_id", "source_url", "staged_id"] {
            let index =
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})");
            sqlx::query(&index).execute(pool).await?;
        }
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_published_at ON {table}(published_at DESC)"
        );
        sqlx::query(&index).execute(pool).await?;
    }

    tracing::debug!("schema migrations applied");
    Ok(())
}
