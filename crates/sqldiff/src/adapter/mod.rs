//! Database adapters: connection lifecycle and raw query execution.
//!
//! An [`Adapter`] owns a connection pool to one database and executes SQL
//! text produced by the query builders. Every projected value crosses the
//! boundary as canonical text (`Option<String>`), so the engine never
//! compares engine-native values.

pub mod mysql;
pub mod postgres;
pub mod uri;

pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use uri::ConnectionUri;

use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::DialectImpl;
use crate::error::Result;
use crate::schema::RawColumn;
use crate::segment::{Row, TablePath};

/// Capability set the engine requires of each database adapter.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Dialect of the connected engine.
    fn dialect(&self) -> &DialectImpl;

    /// Identity of the connection with credentials scrubbed. Two sides with
    /// the same fingerprint refer to the same database (joindiff eligible).
    fn fingerprint(&self) -> &str;

    /// Run a query, returning every projected value as text.
    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>>;

    /// Run a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Introspect the columns of a table.
    async fn list_columns(&self, path: &TablePath) -> Result<Vec<RawColumn>>;

    /// Cheap liveness probe.
    async fn healthcheck(&self) -> Result<()>;

    /// Best-effort cancellation of in-flight queries, then release the pool.
    async fn close(&self);
}

/// Open an adapter for a connection URI, picking the driver from its scheme.
pub async fn connect(uri_text: &str) -> Result<Arc<dyn Adapter>> {
    let uri = ConnectionUri::parse(uri_text)?;
    match uri.dialect()? {
        DialectImpl::Postgres(_) => Ok(Arc::new(PostgresAdapter::connect(uri).await?)),
        DialectImpl::Mysql(_) => Ok(Arc::new(MysqlAdapter::connect(uri).await?)),
    }
}
