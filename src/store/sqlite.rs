//! SQLite adapter.
//!
//! One connection behind a mutex; statements run on tokio's blocking pool and
//! are raced against the caller's [`Context`]. A statement already handed to
//! SQLite runs to completion even if the caller stops waiting for it.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{
    params_from_iter,
    types::{ToSqlOutput, ValueRef},
    Connection, ToSql,
};
use tracing::trace;

use super::{ExecError, Execer, Queryer, Value};
use crate::{context::Context, time::Timestamp};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExecError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, ExecError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn blocking<T, F>(&self, ctx: &Context, f: F) -> Result<T, ExecError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || f(&*conn.lock()));
        let joined = ctx.run(task).await?;
        let out = joined.map_err(anyhow::Error::from)?;
        Ok(out?)
    }
}

/// Timestamps are stored as INTEGER microseconds since the Unix epoch, which
/// orders correctly over chrono's whole range. Sub-microsecond precision is
/// dropped.
fn encode_timestamp(t: &Timestamp) -> i64 {
    t.timestamp_micros()
}

/// Inverse of the encoding used when binding a [`Value::Timestamp`].
pub fn decode_timestamp(micros: i64) -> Option<Timestamp> {
    DateTime::from_timestamp_micros(micros)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(n) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*n)),
            Value::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
            Value::Timestamp(t) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Integer(encode_timestamp(t)))
            }
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

#[async_trait]
impl Execer for SqliteStore {
    async fn exec(&self, ctx: &Context, statement: &str, args: &[Value]) -> Result<u64, ExecError> {
        trace!(statement, args = args.len(), "sqlite exec");
        let statement = statement.to_owned();
        let args = args.to_vec();
        let rows = self
            .blocking(ctx, move |conn| {
                conn.execute(&statement, params_from_iter(args.iter()))
            })
            .await?;
        Ok(rows as u64)
    }
}

#[async_trait]
impl Queryer for SqliteStore {
    async fn query(
        &self,
        ctx: &Context,
        statement: &str,
        args: &[Value],
    ) -> Result<Vec<Vec<Value>>, ExecError> {
        trace!(statement, args = args.len(), "sqlite query");
        let statement = statement.to_owned();
        let args = args.to_vec();
        self.blocking(ctx, move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            let columns = stmt.column_count();
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                (0..columns)
                    .map(|i| row.get_ref(i).map(Value::from))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?;
            rows.collect()
        })
        .await
    }
}
