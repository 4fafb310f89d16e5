//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`crate::migrate`]. Publishing and deleting a published row run in a
//! transaction together with the staged-row flag update.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use content_intake_core::identity::NaturalKey;
use content_intake_core::models::{
    CaseAttributes, Collection, ContentKind, FieldPatch, PublishTarget, PublishedRecord,
    StagedRecord,
};
use content_intake_core::store::{IdentityKey, Store};

const STAGED_COLUMNS: &str = "id, kind, external_id, title, content, source_url, source_site, \
     author_name, author_email, employee_number, image_url, attributes_json, published_at, \
     uploaded_at, uploaded_by, is_published";

const PUBLISHED_COLUMNS: &str = "id, kind, external_id, staged_id, title, content, source_url, \
     source_site, author_name, author_email, employee_number, image_url, attributes_json, \
     published_at, is_pinned, imported_by, created_at, updated_at";

/// Table backing a published store.
pub fn published_table(target: PublishTarget) -> &'static str {
    match target {
        PublishTarget::Feed => "feed_items",
        PublishTarget::Selected => "selected_items",
        PublishTarget::Cases => "case_items",
    }
}

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_kind(row: &SqliteRow) -> Result<ContentKind> {
    let raw: String = row.get("kind");
    raw.parse()
}

fn staged_from_row(row: &SqliteRow) -> Result<StagedRecord> {
    let attributes: String = row.get("attributes_json");
    Ok(StagedRecord {
        id: row.get("id"),
        kind: parse_kind(row)?,
        external_id: row.get("external_id"),
        title: row.get("title"),
        content: row.get("content"),
        source_url: row.get("source_url"),
        source_site: row.get("source_site"),
        author_name: row.get("author_name"),
        author_email: row.get("author_email"),
        employee_number: row.get("employee_number"),
        image_url: row.get("image_url"),
        attributes: CaseAttributes::from_json(&attributes),
        published_at: row.get("published_at"),
        uploaded_at: row.get("uploaded_at"),
        uploaded_by: row.get("uploaded_by"),
        is_published: row.get::<i64, _>("is_published") != 0,
    })
}

fn published_from_row(row: &SqliteRow) -> Result<PublishedRecord> {
    let attributes: String = row.get("attributes_json");
    Ok(PublishedRecord {
        id: row.get("id"),
        kind: parse_kind(row)?,
        external_id: row.get("external_id"),
        staged_id: row.get("staged_id"),
        title: row.get("title"),
        content: row.get("content"),
        source_url: row.get("source_url"),
        source_site: row.get("source_site"),
        author_name: row.get("author_name"),
        author_email: row.get("author_email"),
        employee_number: row.get("employee_number"),
        image_url: row.get("image_url"),
        attributes: CaseAttributes::from_json(&attributes),
        published_at: row.get("published_at"),
        is_pinned: row.get::<i64, _>("is_pinned") != 0,
        imported_by: row.get("imported_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_staged(&self, record: &StagedRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO staged_items ({}) VALUES ({})",
            STAGED_COLUMNS,
            placeholders(16)
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(record.kind.as_str())
            .bind(&record.external_id)
            .bind(&record.title)
            .bind(&record.content)
            .bind(&record.source_url)
            .bind(&record.source_site)
            .bind(&record.author_name)
            .bind(&record.author_email)
            .bind(&record.employee_number)
            .bind(&record.image_url)
            .bind(record.attributes.to_json())
            .bind(&record.published_at)
            .bind(record.uploaded_at)
            .bind(&record.uploaded_by)
            .bind(record.is_published as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_staged(&self, kind: Option<ContentKind>) -> Result<Vec<StagedRecord>> {
        let rows = match kind {
            Some(kind) => {
                let sql = format!(
                    "SELECT {} FROM staged_items WHERE kind = ? ORDER BY uploaded_at DESC, rowid DESC",
                    STAGED_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM staged_items ORDER BY uploaded_at DESC, rowid DESC",
                    STAGED_COLUMNS
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(staged_from_row).collect()
    }

    async fn get_staged(&self, ids: &[String]) -> Result<Vec<StagedRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM staged_items WHERE id IN ({})",
            STAGED_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(staged_from_row).collect()
    }

    async fn delete_staged(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM staged_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_published(
        &self,
        target: PublishTarget,
        record: &PublishedRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            published_table(target),
            PUBLISHED_COLUMNS,
            placeholders(18)
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(record.kind.as_str())
            .bind(&record.external_id)
            .bind(&record.staged_id)
            .bind(&record.title)
            .bind(&record.content)
            .bind(&record.source_url)
            .bind(&record.source_site)
            .bind(&record.author_name)
            .bind(&record.author_email)
            .bind(&record.employee_number)
            .bind(&record.image_url)
            .bind(record.attributes.to_json())
            .bind(&record.published_at)
            .bind(record.is_pinned as i64)
            .bind(&record.imported_by)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;

        if let Some(staged_id) = &record.staged_id {
            sqlx::query("UPDATE staged_items SET is_published = 1 WHERE id = ?")
                .bind(staged_id)
                .execute(&mut *tx)
                .await
                .context("failed to flag staged row as published")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_published(&self, target: PublishTarget) -> Result<Vec<PublishedRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY published_at DESC, created_at DESC, rowid DESC",
            PUBLISHED_COLUMNS,
            published_table(target)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(published_from_row).collect()
    }

    async fn delete_published(&self, target: PublishTarget, id: &str) -> Result<bool> {
        let table = published_table(target);
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT staged_id FROM {} WHERE id = ?", table);
        let row = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let staged_id: Option<String> = match row {
            Some(row) => row.get("staged_id"),
            None => return Ok(false),
        };

        let delete = format!("DELETE FROM {} WHERE id = ?", table);
        sqlx::query(&delete).bind(id).execute(&mut *tx).await?;

        if let Some(staged_id) = staged_id {
            sqlx::query("UPDATE staged_items SET is_published = 0 WHERE id = ?")
                .bind(&staged_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_pinned(&self, target: PublishTarget, id: &str, pinned: bool) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET is_pinned = ?, updated_at = ? WHERE id = ?",
            published_table(target)
        );
        let result = sqlx::query(&sql)
            .bind(pinned as i64)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_published(
        &self,
        target: PublishTarget,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET author_name = COALESCE(?, author_name), \
             image_url = COALESCE(?, image_url), updated_at = ? WHERE id = ?",
            published_table(target)
        );
        let result = sqlx::query(&sql)
            .bind(&patch.author_name)
            .bind(&patch.image_url)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn identity_keys(&self, scope: Collection) -> Result<Vec<IdentityKey>> {
        match scope {
            Collection::Staging(kind) => {
                let rows = sqlx::query(
                    "SELECT id, external_id, title, author_name, source_url, is_published \
                     FROM staged_items WHERE kind = ?",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?;
                Ok(rows
                    .iter()
                    .map(|row| IdentityKey {
                        id: row.get("id"),
                        scope,
                        external_id: row.get("external_id"),
                        title: row.get("title"),
                        author_name: row.get("author_name"),
                        source_url: row.get("source_url"),
                        staged_id: None,
                        is_published: row.get::<i64, _>("is_published") != 0,
                    })
                    .collect())
            }
            Collection::Published(target) => {
                let sql = format!(
                    "SELECT id, external_id, title, author_name, source_url, staged_id FROM {}",
                    published_table(target)
                );
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
                Ok(rows
                    .iter()
                    .map(|row| IdentityKey {
                        id: row.get("id"),
                        scope,
                        external_id: row.get("external_id"),
                        title: row.get("title"),
                        author_name: row.get("author_name"),
                        source_url: row.get("source_url"),
                        staged_id: row.get("staged_id"),
                        is_published: true,
                    })
                    .collect())
            }
        }
    }

    async fn find_by_natural_key(
        &self,
        scope: Collection,
        key: &NaturalKey,
    ) -> Result<Option<IdentityKey>> {
        let (table, kind_filter, staged_cols) = match scope {
            Collection::Staging(_) => (
                "staged_items",
                " AND kind = ?",
                "NULL AS staged_id, is_published",
            ),
            Collection::Published(target) => {
                (published_table(target), "", "staged_id, 1 AS is_published")
            }
        };
        let predicate = match key {
            NaturalKey::AuthorTitle { .. } => "TRIM(author_name) = ? AND TRIM(title) = ?",
            NaturalKey::SourceUrl { .. } => "TRIM(source_url) = ?",
        };
        let sql = format!(
            "SELECT id, external_id, title, author_name, source_url, {} FROM {} WHERE {}{} \
             ORDER BY rowid LIMIT 1",
            staged_cols, table, predicate, kind_filter
        );
        let mut query = sqlx::query(&sql);
        query = match key {
            NaturalKey::AuthorTitle { author, title } => query.bind(author).bind(title),
            NaturalKey::SourceUrl { url } => query.bind(url),
        };
        if let Collection::Staging(kind) = scope {
            query = query.bind(kind.as_str());
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|row| IdentityKey {
            id: row.get("id"),
            scope,
            external_id: row.get("external_id"),
            title: row.get("title"),
            author_name: row.get("author_name"),
            source_url: row.get("source_url"),
            staged_id: row.get("staged_id"),
            is_published: row.get::<i64, _>("is_published") != 0,
        }))
    }
}
