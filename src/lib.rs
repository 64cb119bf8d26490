//! Time-bounded, exclusive leases on named resources, recorded in a shared SQL
//! table.
//!
//! A [`Lessor`] maps lease operations onto one table. [`Lessor::acquire`]
//! inserts a row for a name and hands back a [`Lease`] carrying a random key;
//! the key must match for [`Lease::renew`] and [`Lease::release`] to touch the
//! row. Mutual exclusion comes entirely from the store: a unique index on the
//! name column makes a second insert for a held name fail.
//!
//! The table is provisioned by the operator, not by this crate. See
//! [`LeaseTable`] for what it needs.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod lease;
pub mod lessor;
pub mod store;
pub mod time;

pub mod test_utils;

pub use context::{CancelGuard, Context, ContextError};
pub use error::{Error, Result};
pub use lease::{Lease, LeaseRecord};
pub use lessor::{LeaseTable, Lessor};
pub use store::{Db, ExecError, Execer, Queryer, SqliteStore, Value};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
