//! Transition errors.

use crate::{BackendError, Handle, Principal};
use std::time::Duration;
use thiserror::Error;

/// Reasons a ledger transition is rejected.  Every variant leaves the ledger unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Contribution attempted before the minimum interval elapsed.
    #[error("{principal} is rate limited, retry in {}s", .retry_after.as_secs())]
    RateLimited {
        /// Principal that contributed too early.
        principal: Principal,
        /// Remaining wait before a contribution is accepted.
        retry_after: Duration,
    },
    /// The principal has never contributed.
    #[error("no ledger entry for {0}")]
    NotFound(Principal),
    /// The encrypted input or its proof failed verification.
    #[error("invalid encrypted input: {0}")]
    ProofInvalid(String),
    /// The ledger tried to operate on a handle it was never granted.
    ///
    /// This is an invariant violation, not a runtime condition.
    #[error("ledger holds no self-grant for handle {handle}")]
    GrantMissing {
        /// Handle lacking a self-grant.
        handle: Handle,
    },
    /// The homomorphic backend failed mid-transition.
    #[error("backend failure: {0}")]
    Backend(BackendError),
}

impl LedgerError {
    /// Returns true when the caller can retry or fix its request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NotFound(_))
    }

    /// Remaining wait for a rate-limited contribution.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<BackendError> for LedgerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ProofRejected(reason) => Self::ProofInvalid(reason),
            other => Self::Backend(other),
        }
    }
}

/// Result alias for ledger transitions.
pub type LedgerResult<T> = Result<T, LedgerError>;
