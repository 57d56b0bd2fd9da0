//! Notifications queued by committed transitions.

use crate::{Handle, Principal, Timestamp};
use serde::{Deserialize, Serialize};

/// Ledger change observed by a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A contribution was accumulated.
    Contributed {
        /// Contributing principal.
        principal: Principal,
        /// Principal's new encrypted total.
        total: Handle,
        /// Transition timestamp.
        at: Timestamp,
        /// True when this contribution created the principal's entry.
        first: bool,
    },
    /// A rank was computed and granted.
    RankComputed {
        /// Ranked principal.
        principal: Principal,
        /// Encrypted 1-indexed rank.
        rank: Handle,
    },
}

impl LedgerEvent {
    /// Principal the event concerns.
    pub fn principal(&self) -> &Principal {
        match self {
            Self::Contributed { principal, .. } | Self::RankComputed { principal, .. } => principal,
        }
    }
}
