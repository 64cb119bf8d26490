use std::sync::Arc;

use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    context::Context,
    error::{Error, Result},
    lease::{Lease, LeaseRecord},
    store::Execer,
    time::{Clock, SystemClock, Timestamp},
};

pub const DEFAULT_TABLE: &str = "leases";
pub const DEFAULT_NAME_COLUMN: &str = "name";
pub const DEFAULT_EXP_COLUMN: &str = "exp";
pub const DEFAULT_KEY_COLUMN: &str = "key";

/// Random bytes per lease key; hex-encoded this is 32 characters.
pub const KEY_BYTES: usize = 16;

/// Where lease rows live. Any field left empty falls back to its default when
/// a statement is built, so `LeaseTable::default()` is always usable.
///
/// The table itself is provisioned elsewhere:
/// - the name column must be string-compatible and uniquely indexed (a
///   suitable primary key);
/// - the exp column must hold timestamps and should carry a non-unique index,
///   since every acquire sweeps on it;
/// - the key column must hold a 32-character string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseTable {
    pub table: String,
    pub name: String,
    pub exp: String,
    pub key: String,
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

impl LeaseTable {
    pub fn table_name(&self) -> &str {
        or_default(&self.table, DEFAULT_TABLE)
    }

    pub fn name_column(&self) -> &str {
        or_default(&self.name, DEFAULT_NAME_COLUMN)
    }

    pub fn exp_column(&self) -> &str {
        or_default(&self.exp, DEFAULT_EXP_COLUMN)
    }

    pub fn key_column(&self) -> &str {
        or_default(&self.key, DEFAULT_KEY_COLUMN)
    }

    pub(crate) fn sweep_statement(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} < $1",
            self.table_name(),
            self.exp_column()
        )
    }

    pub(crate) fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ($1, $2, $3)",
            self.table_name(),
            self.name_column(),
            self.exp_column(),
            self.key_column()
        )
    }

    pub(crate) fn renew_statement(&self) -> String {
        format!(
            "UPDATE {} SET {} = $1 WHERE {} = $2 AND {} = $3 AND {} > $4",
            self.table_name(),
            self.exp_column(),
            self.name_column(),
            self.key_column(),
            self.exp_column()
        )
    }

    pub(crate) fn release_statement(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            self.table_name(),
            self.name_column(),
            self.key_column()
        )
    }

    /// DDL matching the requirements above, for operators to run themselves.
    pub fn recommended_schema(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} INTEGER NOT NULL, {} TEXT NOT NULL)",
                self.table_name(),
                self.name_column(),
                self.exp_column(),
                self.key_column()
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_{1}_idx ON {0} ({1})",
                self.table_name(),
                self.exp_column()
            ),
        ]
    }
}

/// Hands out leases recorded in one table of a shared store.
///
/// A `Lessor` is read-only once built. Share it behind an `Arc`; every
/// [`Lease`] it issues keeps a reference back to it.
#[derive(Debug)]
pub struct Lessor {
    db: Arc<dyn Execer>,
    clock: Arc<dyn Clock>,
    table: LeaseTable,
}

impl Lessor {
    pub fn new(db: Arc<dyn Execer>) -> Self {
        Self::with_table(db, LeaseTable::default())
    }

    pub fn with_table(db: Arc<dyn Execer>, table: LeaseTable) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            table,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn table(&self) -> &LeaseTable {
        &self.table
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn db(&self) -> &dyn Execer {
        self.db.as_ref()
    }

    /// Try to take the lease called `name` until `exp`. Never blocks waiting
    /// for a current holder: if `name` is held and unexpired the insert is
    /// rejected by the store's uniqueness constraint and that error is returned.
    ///
    /// Before inserting, every expired row in the table is deleted, whatever
    /// its name. That sweep sticks even when the insert then fails.
    pub async fn acquire(
        self: &Arc<Self>,
        ctx: &Context,
        name: &str,
        exp: Timestamp,
    ) -> Result<Lease> {
        let now = self.now();
        let swept = self
            .db
            .exec(ctx, &self.table.sweep_statement(), &[now.into()])
            .await
            .map_err(Error::Sweep)?;
        if swept > 0 {
            debug!(table = self.table.table_name(), rows = swept, "swept stale leases");
        }

        let key = generate_key()?;

        self.db
            .exec(
                ctx,
                &self.table.insert_statement(),
                &[name.into(), exp.into(), key.as_str().into()],
            )
            .await
            .map_err(Error::Insert)?;

        info!(lease = name, %exp, "lease acquired");
        Ok(self.attach(LeaseRecord {
            name: name.to_owned(),
            exp,
            key,
        }))
    }

    /// [`Lessor::acquire`] with an expiration `ttl` from now.
    pub async fn acquire_for(
        self: &Arc<Self>,
        ctx: &Context,
        name: &str,
        ttl: Duration,
    ) -> Result<Lease> {
        let exp = self.now() + ttl;
        self.acquire(ctx, name, exp).await
    }

    /// Rebuild a lease received from another process. The sender and this
    /// lessor must point at the same logical table.
    pub fn attach(self: &Arc<Self>, record: LeaseRecord) -> Lease {
        Lease::new(Arc::clone(self), record)
    }
}

fn generate_key() -> Result<String> {
    let mut key = [0u8; KEY_BYTES];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(hex::encode(key))
}
