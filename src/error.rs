use thiserror::Error;

use crate::store::ExecError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("deleting stale leases: {0}")]
    Sweep(#[source] ExecError),

    #[error("computing key: {0}")]
    KeyGeneration(#[from] rand::Error),

    #[error("inserting into database: {0}")]
    Insert(#[source] ExecError),

    #[error("updating database: {0}")]
    Update(#[source] ExecError),

    /// The conditional update matched no row: the lease expired, was released,
    /// or now belongs to someone else. Either way it is no longer held.
    #[error("could not renew lease {name:?}")]
    RenewRefused { name: String },

    #[error("deleting from database: {0}")]
    Delete(#[source] ExecError),
}

impl Error {
    /// The store-level failure behind this error, if there is one.
    pub fn exec_error(&self) -> Option<&ExecError> {
        match self {
            Error::Sweep(e) | Error::Insert(e) | Error::Update(e) | Error::Delete(e) => Some(e),
            Error::KeyGeneration(_) | Error::RenewRefused { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
