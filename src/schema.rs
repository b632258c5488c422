//! SchemaExtractor (§4.3): read-through catalog snapshot for a database.
//!
//! Queries `information_schema`/`pg_catalog` directly rather than through
//! `QueryExecutor` — a schema lookup is not candidate SQL and does not need
//! the safety validator or a read-only transaction wrapper, only its own
//! pooled connection. Grounded in the catalog-query idiom already used by
//! `store/postgres.rs`'s dynamic-SQL builders.

use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::errors::ExecutorError;
use crate::models::{SchemaColumn, SchemaSnapshot, SchemaTable, SemanticForeignKey};

pub struct SchemaExtractor {
    pool: PgPool,
}

impl SchemaExtractor {
    pub fn new(pool: PgPool) -> Self {
        SchemaExtractor { pool }
    }

    /// Return a deterministic, alphabetized snapshot of `database`'s tables,
    /// columns, and foreign keys, with best-effort row counts (§4.3).
    pub async fn extract(&self, database: &str) -> Result<SchemaSnapshot, ExecutorError> {
        let table_names = self.list_tables(database).await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = self.list_columns(database, &name).await?;
            let foreign_keys = self.list_foreign_keys(database, &name).await?;
            let row_count = self.estimate_row_count(database, &name).await?;
            tables.push(SchemaTable { name, columns, foreign_keys, row_count });
        }

        Ok(SchemaSnapshot { database: database.to_string(), tables })
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, ExecutorError> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(database)
        .fetch_all(&self.pool)
        .await
        .map_err(ExecutorError::from)?;

        rows.iter().map(|r| r.try_get::<String, _>("table_name").map_err(ExecutorError::from)).collect()
    }

    async fn list_columns(&self, database: &str, table: &str) -> Result<Vec<SchemaColumn>, ExecutorError> {
        let rows = sqlx::query(
            "SELECT c.column_name, c.data_type, c.is_nullable, \
                EXISTS ( \
                    SELECT 1 FROM information_schema.key_column_usage kcu \
                    JOIN information_schema.table_constraints tc \
                        ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                    WHERE tc.constraint_type = 'PRIMARY KEY' \
                        AND kcu.table_schema = c.table_schema AND kcu.table_name = c.table_name \
                        AND kcu.column_name = c.column_name \
                ) AS is_primary_key \
             FROM information_schema.columns c \
             WHERE c.table_schema = $1 AND c.table_name = $2 \
             ORDER BY c.column_name",
        )
        .bind(database)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(ExecutorError::from)?;

        rows.iter()
            .map(|r| {
                Ok(SchemaColumn {
                    name: r.try_get("column_name")?,
                    data_type: r.try_get("data_type")?,
                    nullable: r.try_get::<String, _>("is_nullable")? == "YES",
                    primary_key: r.try_get("is_primary_key")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(ExecutorError::from)
    }

    async fn list_foreign_keys(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<SemanticForeignKey>, ExecutorError> {
        let rows = sqlx::query(
            "SELECT kcu.column_name AS local_column, ccu.table_name AS ref_table, \
                ccu.column_name AS ref_column \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
                ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
                ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
                AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.column_name",
        )
        .bind(database)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(ExecutorError::from)?;

        rows.iter()
            .map(|r| {
                Ok(SemanticForeignKey {
                    local_column: r.try_get("local_column")?,
                    ref_table: r.try_get("ref_table")?,
                    ref_column: r.try_get("ref_column")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(ExecutorError::from)
    }

    /// `pg_class.reltuples` is a planner estimate, not an exact count, by
    /// design (§4.3: "best-effort ... may be approximate").
    async fn estimate_row_count(&self, database: &str, table: &str) -> Result<Option<i64>, ExecutorError> {
        let qualified = format!("{database}.{table}");
        let estimate: Option<f32> = sqlx::query_scalar("SELECT reltuples FROM pg_class WHERE oid = $1::regclass")
            .bind(&qualified)
            .fetch_optional(&self.pool)
            .await
            .map_err(ExecutorError::from)?;

        Ok(estimate.map(|r| r.max(0.0) as i64))
    }
}
