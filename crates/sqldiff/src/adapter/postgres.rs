//! PostgreSQL adapter over tokio-postgres with a deadpool connection pool.

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::types::Type;
use tokio_postgres::NoTls;
use tracing::debug;

use crate::dialect::DialectImpl;
use crate::error::{DiffError, Result};
use crate::schema::RawColumn;
use crate::segment::{Row, TablePath};

use super::uri::ConnectionUri;
use super::Adapter;

pub struct PostgresAdapter {
    pool: Pool,
    dialect: DialectImpl,
    fingerprint: String,
}

impl PostgresAdapter {
    pub async fn connect(uri: ConnectionUri) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(uri.host.clone());
        cfg.port = uri.port;
        cfg.user = uri.user.clone();
        cfg.password = uri.password.clone();
        cfg.dbname = uri.database.clone();

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DiffError::backend(format!("Failed to create pool: {}", e)))?;

        let adapter = Self {
            pool,
            dialect: uri.dialect()?,
            fingerprint: uri.scrubbed(),
        };
        adapter.healthcheck().await?;
        Ok(adapter)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| DiffError::transient(format!("Pool checkout failed: {}", e)))
    }
}

/// Render one projected value as text, independent of its wire type.
fn value_to_text(row: &tokio_postgres::Row, idx: usize) -> Result<Option<String>> {
    let col_type = row.columns()[idx].type_();
    let text = match *col_type {
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| v.to_string()),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| v.to_string()),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(|v| v.to_string()),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| v.to_string()),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(|v| v.to_string()),
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)?
            .map(|v| if v { "1" } else { "0" }.to_string()),
        _ => row.try_get::<_, Option<String>>(idx).map_err(|e| {
            DiffError::backend(format!(
                "Cannot read column {} of type {} as text: {}",
                idx, col_type, e
            ))
        })?,
    };
    Ok(text)
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        debug!(sql, "postgres query");
        let client = self.client().await?;
        let rows = client.query(sql, &[]).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                values.push(value_to_text(row, idx)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!(sql, "postgres execute");
        let client = self.client().await?;
        Ok(client.execute(sql, &[]).await?)
    }

    async fn list_columns(&self, path: &TablePath) -> Result<Vec<RawColumn>> {
        let (schema, table) = match path.0.as_slice() {
            [table] => ("public".to_string(), table.clone()),
            [.., schema, table] => (schema.clone(), table.clone()),
            [] => return Err(DiffError::Config("Empty table path".into())),
        };

        // information_schema exposes domain types; cast to base types so the
        // driver can decode them directly.
        let sql = "SELECT column_name::text, data_type::text, \
                   datetime_precision::int4, numeric_precision::int4, \
                   numeric_scale::int4, is_nullable::text \
                   FROM information_schema.columns \
                   WHERE table_schema = $1 AND table_name = $2 \
                   ORDER BY ordinal_position";
        let client = self.client().await?;
        let rows = client.query(sql, &[&schema, &table]).await?;
        if rows.is_empty() {
            return Err(DiffError::Config(format!("Table not found: {}", path)));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(RawColumn {
                name: row.try_get::<_, String>(0)?,
                type_text: row.try_get::<_, String>(1)?,
                datetime_precision: row.try_get::<_, Option<i32>>(2)?.map(|p| p as u8),
                numeric_precision: row.try_get::<_, Option<i32>>(3)?.map(|p| p.min(255) as u8),
                numeric_scale: row.try_get::<_, Option<i32>>(4)?.map(|s| s.min(255) as u8),
                nullable: row.try_get::<_, String>(5)? == "YES",
            });
        }
        Ok(columns)
    }

    async fn healthcheck(&self) -> Result<()> {
        let client = self.client().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}
