use std::{fmt, sync::Arc};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    context::{CancelGuard, Context},
    error::{Error, Result},
    lessor::Lessor,
    time::Timestamp,
};

/// The part of a lease that can cross a process boundary.
///
/// The receiving process turns it back into a [`Lease`] with
/// [`Lessor::attach`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub name: String,
    pub exp: Timestamp,
    /// Proof of ownership, required to renew or release.
    pub key: String,
}

impl fmt::Debug for LeaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseRecord")
            .field("name", &self.name)
            .field("exp", &self.exp)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A claimed row in the lessor's table.
///
/// The handle does not watch its row. It finds out the lease expired, was
/// released, or was taken over only when [`Lease::renew`] is refused.
#[derive(Debug, Clone)]
pub struct Lease {
    lessor: Arc<Lessor>,
    record: LeaseRecord,
}

impl Lease {
    pub(crate) fn new(lessor: Arc<Lessor>, record: LeaseRecord) -> Self {
        Self { lessor, record }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn exp(&self) -> Timestamp {
        self.record.exp
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }

    pub fn lessor(&self) -> &Arc<Lessor> {
        &self.lessor
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn into_record(self) -> LeaseRecord {
        self.record
    }

    /// Move the expiration to `exp`.
    ///
    /// Only succeeds while the row still exists, still carries this lease's
    /// key, and has not yet expired. Anything else is
    /// [`Error::RenewRefused`]; treat that as having lost the lease.
    pub async fn renew(&mut self, ctx: &Context, exp: Timestamp) -> Result<()> {
        let table = self.lessor.table();
        let now = self.lessor.now();
        let rows = self
            .lessor
            .db()
            .exec(
                ctx,
                &table.renew_statement(),
                &[
                    exp.into(),
                    self.record.name.as_str().into(),
                    self.record.key.as_str().into(),
                    now.into(),
                ],
            )
            .await
            .map_err(Error::Update)?;

        if rows == 0 {
            warn!(lease = %self.record.name, "lease renewal refused");
            return Err(Error::RenewRefused {
                name: self.record.name.clone(),
            });
        }

        debug!(lease = %self.record.name, %exp, "lease renewed");
        self.record.exp = exp;
        Ok(())
    }

    /// [`Lease::renew`] with an expiration `ttl` from now.
    pub async fn renew_for(&mut self, ctx: &Context, ttl: Duration) -> Result<()> {
        let exp = self.lessor.now() + ttl;
        self.renew(ctx, exp).await
    }

    /// Delete the row if this lease still owns it. Releasing a lease that is
    /// already gone is not an error.
    pub async fn release(&self, ctx: &Context) -> Result<()> {
        let rows = self
            .lessor
            .db()
            .exec(
                ctx,
                &self.lessor.table().release_statement(),
                &[
                    self.record.name.as_str().into(),
                    self.record.key.as_str().into(),
                ],
            )
            .await
            .map_err(Error::Delete)?;

        if rows == 0 {
            debug!(lease = %self.record.name, "lease already gone");
        } else {
            info!(lease = %self.record.name, "lease released");
        }
        Ok(())
    }

    /// A child of `parent` whose deadline is this lease's expiration.
    ///
    /// Nothing is checked against the store; the scope just ends when the
    /// lease is due to. Keep the guard alive for as long as the scope is in
    /// use:
    ///
    /// ```ignore
    /// let (ctx, _guard) = lease.context(&parent);
    /// do_work(&ctx).await?;
    /// ```
    pub fn context(&self, parent: &Context) -> (Context, CancelGuard) {
        parent.with_deadline(self.record.exp)
    }
}
