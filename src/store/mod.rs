//! Capabilities the data layer exposes.
//!
//! Each capability is its own trait so a consumer can ask for exactly what it
//! uses. The lease core only needs [`Execer`]; test doubles never have to
//! implement querying.

use async_trait::async_trait;

use crate::{
    context::{Context, ContextError},
    time::Timestamp,
};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// A positional statement argument or a column value read back.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(Timestamp),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Value::Timestamp(t)
    }
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ExecError {
    /// Whether the store rejected the statement for violating a constraint,
    /// e.g. a second insert for a name that is already held.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ExecError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Executes a statement and reports how many rows it touched.
#[async_trait]
pub trait Execer: Send + Sync + std::fmt::Debug {
    async fn exec(&self, ctx: &Context, statement: &str, args: &[Value]) -> Result<u64, ExecError>;
}

/// Runs a statement that yields rows.
#[async_trait]
pub trait Queryer: Send + Sync + std::fmt::Debug {
    async fn query(
        &self,
        ctx: &Context,
        statement: &str,
        args: &[Value],
    ) -> Result<Vec<Vec<Value>>, ExecError>;
}

/// A full handle: everything a store can do.
pub trait Db: Execer + Queryer {}

impl<T: Execer + Queryer> Db for T {}
