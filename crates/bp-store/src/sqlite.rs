//! SQLite Document Store
//!
//! Single `documents` table holding JSON text with a version column used for
//! conditional writes.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::{Document, DocumentStore, Result, StoreError, WriteOp};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let body: String = row.get("body");
        let version: i64 = row.get("version");
        Ok(Document {
            id: row.get("id"),
            body: serde_json::from_str(&body)?,
            version: version as u64,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite document store schema initialized");
        Ok(())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                WriteOp::Put { id, body } => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (id, body, version) VALUES (?, ?, 1)
                        ON CONFLICT(id) DO UPDATE SET
                            body = excluded.body,
                            version = documents.version + 1
                        "#,
                    )
                    .bind(&id)
                    .bind(body.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Delete { id } => {
                    sqlx::query("DELETE FROM documents WHERE id = ?")
                        .bind(&id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, body, version FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn put_if_version(
        &self,
        id: &str,
        body: serde_json::Value,
        expected: Option<u64>,
    ) -> Result<u64> {
        let body = body.to_string();
        let (result, version) = match expected {
            None => {
                let result = sqlx::query(
                    "INSERT INTO documents (id, body, version) VALUES (?, ?, 1) ON CONFLICT(id) DO NOTHING",
                )
                .bind(id)
                .bind(&body)
                .execute(&self.pool)
                .await?;
                (result, 1)
            }
            Some(expected) => {
                let result = sqlx::query(
                    "UPDATE documents SET body = ?, version = version + 1 WHERE id = ? AND version = ?",
                )
                .bind(&body)
                .bind(id)
                .bind(expected as i64)
                .execute(&self.pool)
                .await?;
                (result, expected + 1)
            }
        };

        if result.rows_affected() == 1 {
            Ok(version)
        } else {
            Err(StoreError::Conflict(id.to_string()))
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, body, version FROM documents WHERE substr(id, 1, length(?)) = ? ORDER BY id",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_row).collect()
    }
}
