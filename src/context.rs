//! Cancellable, deadline-bearing scopes.
//!
//! Every store call takes a [`Context`]. Cancellation is cooperative: a store
//! adapter races its work against [`Context::done`] (usually via
//! [`Context::run`]). Deriving a child with [`Context::with_cancel`] or
//! [`Context::with_deadline`] hands back a [`CancelGuard`]; the child stays live
//! only as long as the guard does.

use std::future::Future;

use chrono::Utc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Timestamp>,
}

impl Context {
    /// A root scope that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(&self) -> (Context, CancelGuard) {
        self.derive(self.deadline)
    }

    /// Derive a child that expires at `at`, or at the parent's deadline if that
    /// comes first.
    pub fn with_deadline(&self, at: Timestamp) -> (Context, CancelGuard) {
        let deadline = match self.deadline {
            Some(parent) if parent < at => parent,
            _ => at,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Timestamp>) -> (Context, CancelGuard) {
        let token = self.token.child_token();
        let guard = CancelGuard(token.clone().drop_guard());
        (Context { token, deadline }, guard)
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    /// Why this scope is finished, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(at) if at <= Utc::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the scope is canceled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        let Some(at) = self.deadline else {
            self.token.cancelled().await;
            return ContextError::Canceled;
        };
        let remaining = at
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or_default();
        tokio::select! {
            () = self.token.cancelled() => ContextError::Canceled,
            () = tokio::time::sleep(remaining) => ContextError::DeadlineExceeded,
        }
    }

    /// Drive `fut` to completion unless the scope finishes first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels a derived [`Context`] when dropped or when [`CancelGuard::cancel`] is
/// called.
#[derive(Debug)]
#[must_use = "dropping the guard cancels the derived context immediately"]
pub struct CancelGuard(DropGuard);

impl CancelGuard {
    pub fn cancel(self) {
        drop(self);
    }
}
