//! MySQL / MariaDB adapter over sqlx.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use tracing::debug;

use crate::dialect::DialectImpl;
use crate::error::{DiffError, Result};
use crate::schema::RawColumn;
use crate::segment::{Row, TablePath};

use super::uri::ConnectionUri;
use super::Adapter;

pub struct MysqlAdapter {
    pool: MySqlPool,
    dialect: DialectImpl,
    fingerprint: String,
    database: Option<String>,
}

impl MysqlAdapter {
    pub async fn connect(uri: ConnectionUri) -> Result<Self> {
        let mut opts = MySqlConnectOptions::new().host(&uri.host);
        if let Some(port) = uri.port {
            opts = opts.port(port);
        }
        if let Some(user) = &uri.user {
            opts = opts.username(user);
        }
        if let Some(password) = &uri.password {
            opts = opts.password(password);
        }
        if let Some(db) = &uri.database {
            opts = opts.database(db);
        }

        let pool = MySqlPoolOptions::new().connect_with(opts).await?;
        Ok(Self {
            pool,
            dialect: uri.dialect()?,
            fingerprint: uri.scrubbed(),
            database: uri.database.clone(),
        })
    }
}

/// Render one projected value as text, independent of its wire type.
fn value_to_text(row: &MySqlRow, idx: usize) -> Result<Option<String>> {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    let text = match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx)?.map(|v| v.to_string())
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(idx)?.map(|v| v.to_string()),
        "FLOAT" => row.try_get::<Option<f32>, _>(idx)?.map(|v| v.to_string()),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(|v| v.to_string()),
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(idx)?
            .map(|v| if v { "1" } else { "0" }.to_string()),
        _ => row.try_get::<Option<String>, _>(idx).map_err(|e| {
            DiffError::backend(format!(
                "Cannot read column {} of type {} as text: {}",
                idx, type_name, e
            ))
        })?,
    };
    Ok(text)
}

#[async_trait]
impl Adapter for MysqlAdapter {
    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        debug!(sql, "mysql query");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.columns().len());
            for idx in 0..row.columns().len() {
                values.push(value_to_text(row, idx)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql, "mysql execute");
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn list_columns(&self, path: &TablePath) -> Result<Vec<RawColumn>> {
        let (schema, table) = match path.0.as_slice() {
            [table] => (
                self.database
                    .clone()
                    .ok_or_else(|| DiffError::Config("No database selected".into()))?,
                table.clone(),
            ),
            [.., schema, table] => (schema.clone(), table.clone()),
            [] => return Err(DiffError::Config("Empty table path".into())),
        };

        let sql = "SELECT column_name, column_type, datetime_precision, numeric_precision, \
                   numeric_scale, is_nullable \
                   FROM information_schema.columns \
                   WHERE table_schema = ? AND table_name = ? \
                   ORDER BY ordinal_position";
        let rows = sqlx::query(sql)
            .bind(&schema)
            .bind(&table)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(DiffError::Config(format!("Table not found: {}", path)));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(RawColumn {
                name: row.try_get::<String, _>(0)?,
                type_text: row.try_get::<String, _>(1)?,
                datetime_precision: row.try_get::<Option<u64>, _>(2)?.map(|p| p.min(255) as u8),
                numeric_precision: row.try_get::<Option<u64>, _>(3)?.map(|p| p.min(255) as u8),
                numeric_scale: row.try_get::<Option<u64>, _>(4)?.map(|s| s.min(255) as u8),
                nullable: row.try_get::<String, _>(5)? == "YES",
            });
        }
        Ok(columns)
    }

    async fn healthcheck(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
