//! Append-only capability registry for ciphertext handles.
//!
//! A grant `(handle, grantee)` either lets the ledger keep operating on a
//! handle ([`Grantee::Ledger`]) or lets a principal ask the external
//! decryption oracle for its cleartext ([`Grantee::Principal`]).  Grants are
//! never revoked.
//!
//! Transitions do not write to [`AccessControl`] directly.  They stage grants
//! in a [`GrantScope`], which is merged only when the transition commits, so
//! an aborted transition leaves no grants behind.

use crate::{error::LedgerError, Handle, Principal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Party a handle is granted to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Grantee {
    /// The ledger itself, allowed to feed the handle into further operations.
    Ledger,
    /// A principal allowed to request decryption.
    Principal(Principal),
}

/// One persisted capability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grant {
    /// Granted handle.
    pub handle: Handle,
    /// Party holding the capability.
    pub grantee: Grantee,
}

/// Persistent grant relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessControl {
    grants: BTreeSet<Grant>,
}

impl AccessControl {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `grantee` holds a grant on `handle`.
    pub fn is_allowed(&self, handle: Handle, grantee: &Grantee) -> bool {
        self.grants.contains(&Grant {
            handle,
            grantee: grantee.clone(),
        })
    }

    /// Returns true if the ledger may operate on `handle`.
    pub fn allowed_self(&self, handle: Handle) -> bool {
        self.is_allowed(handle, &Grantee::Ledger)
    }

    /// Returns true if `principal` may request decryption of `handle`.
    pub fn allowed_principal(&self, handle: Handle, principal: &Principal) -> bool {
        self.is_allowed(handle, &Grantee::Principal(principal.clone()))
    }

    /// All grantees holding a capability on `handle`.
    pub fn grants_for(&self, handle: Handle) -> Vec<&Grantee> {
        self.grants
            .iter()
            .filter(|grant| grant.handle == handle)
            .map(|grant| &grant.grantee)
            .collect()
    }

    /// Iterates grants in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Grant> {
        self.grants.iter()
    }

    /// Number of persisted grants.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// True when no grant has been issued.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Opens a staging scope for one transition.
    pub fn scope(&self) -> GrantScope<'_> {
        GrantScope {
            base: self,
            transient: HashSet::new(),
            staged: BTreeSet::new(),
        }
    }

    /// Merges grants staged by a committed transition.  Returns how many were new.
    pub fn commit(&mut self, staged: StagedGrants) -> usize {
        let before = self.grants.len();
        self.grants.extend(staged.0);
        self.grants.len() - before
    }
}

/// Grants produced by a transition, waiting to be committed.
#[derive(Debug, Default)]
pub struct StagedGrants(BTreeSet<Grant>);

impl StagedGrants {
    /// Number of staged grants.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Grant view for a single transition.
///
/// Lookups see the persisted registry plus everything staged so far.
/// Transient self-grants cover intermediate handles and vanish with the scope.
#[derive(Debug)]
pub struct GrantScope<'a> {
    base: &'a AccessControl,
    transient: HashSet<Handle>,
    staged: BTreeSet<Grant>,
}

impl<'a> GrantScope<'a> {
    /// Lets the ledger use `handle` until the transition ends.
    pub fn allow_transient(&mut self, handle: Handle) {
        self.transient.insert(handle);
    }

    /// Stages a persistent self-grant on `handle`.
    pub fn grant_self(&mut self, handle: Handle) {
        self.staged.insert(Grant {
            handle,
            grantee: Grantee::Ledger,
        });
    }

    /// Stages a decryption grant on `handle` for `principal`.
    pub fn grant_to(&mut self, handle: Handle, principal: &Principal) {
        self.staged.insert(Grant {
            handle,
            grantee: Grantee::Principal(principal.clone()),
        });
    }

    /// Fails with [`LedgerError::GrantMissing`] unless the ledger may operate on `handle`.
    pub fn require_self(&self, handle: Handle) -> Result<(), LedgerError> {
        let staged = self.staged.contains(&Grant {
            handle,
            grantee: Grantee::Ledger,
        });
        if staged || self.transient.contains(&handle) || self.base.allowed_self(handle) {
            Ok(())
        } else {
            Err(LedgerError::GrantMissing { handle })
        }
    }

    /// Ends the scope, dropping transient grants and keeping staged ones.
    pub fn finish(self) -> StagedGrants {
        StagedGrants(self.staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(byte: u8) -> Handle {
        Handle::from_bytes([byte; 32])
    }

    #[test]
    fn staged_grants_are_invisible_until_commit() {
        let mut acl = AccessControl::new();
        let alice = Principal::new("alice");
        let staged = {
            let mut scope = acl.scope();
            scope.grant_self(handle(1));
            scope.grant_to(handle(1), &alice);
            assert!(scope.require_self(handle(1)).is_ok());
            scope.finish()
        };
        assert!(acl.is_empty());
        assert_eq!(acl.commit(staged), 2);
        assert!(acl.allowed_self(handle(1)));
        assert!(acl.allowed_principal(handle(1), &alice));
        assert!(!acl.allowed_principal(handle(1), &Principal::new("bob")));
    }

    #[test]
    fn transient_grants_do_not_persist() {
        let mut acl = AccessControl::new();
        let staged = {
            let mut scope = acl.scope();
            scope.allow_transient(handle(2));
            assert!(scope.require_self(handle(2)).is_ok());
            scope.finish()
        };
        assert!(staged.is_empty());
        acl.commit(staged);
        assert!(!acl.allowed_self(handle(2)));
    }

    #[test]
    fn missing_self_grant_is_reported() {
        let acl = AccessControl::new();
        let scope = acl.scope();
        match scope.require_self(handle(3)) {
            Err(LedgerError::GrantMissing { handle: h }) => assert_eq!(h, handle(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_grants_are_idempotent() {
        let mut acl = AccessControl::new();
        let alice = Principal::new("alice");
        for _ in 0..2 {
            let mut scope = acl.scope();
            scope.grant_to(handle(4), &alice);
            let staged = scope.finish();
            acl.commit(staged);
        }
        assert_eq!(acl.len(), 1);
        assert_eq!(acl.grants_for(handle(4)).len(), 1);
    }
}
