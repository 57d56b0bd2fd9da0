//! Encrypted contribution ledger.
//!
//! The ledger keeps four logical tables in a [`LedgerState`]:
//!
//! * **records**: per-principal encrypted running total, existence flag and
//!   last contribution time;
//! * **registry**: distinct principals in first-contribution order;
//! * **aggregate**: the encrypted sum of every contribution ever accepted;
//! * **grants**: the append-only [`AccessControl`] relation.
//!
//! Every public method on [`Ledger`] is one transition.  Mutating transitions
//! compute all new handles and stage all grants first, then commit in a single
//! step, so a rejected or failed transition leaves the state untouched.

use crate::acl::AccessControl;
use crate::backend::{EncryptedInput, HomomorphicBackend};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::rate_limit::{RateDecision, RateLimit};
use crate::{Handle, Principal, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Ledger entry for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Encrypted running total.
    pub encrypted_total: Handle,
    /// Always true for stored records.
    pub exists: bool,
    /// Timestamp of the last accepted contribution.
    pub last_contribution_time: Timestamp,
}

/// Persistable ledger tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    records: BTreeMap<Principal, PlayerRecord>,
    registry: Vec<Principal>,
    aggregate: Handle,
    grants: AccessControl,
    transitions: u64,
}

impl LedgerState {
    /// Genesis state: no players, uninitialized aggregate, no grants.
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Record for `principal`, if any.
    pub fn record(&self, principal: &Principal) -> Option<&PlayerRecord> {
        self.records.get(principal)
    }

    /// Principals in first-contribution order.
    pub fn registry(&self) -> &[Principal] {
        &self.registry
    }

    /// Aggregate handle (`Handle::ZERO` before the first contribution).
    pub fn aggregate(&self) -> Handle {
        self.aggregate
    }

    /// Grant relation.
    pub fn grants(&self) -> &AccessControl {
        &self.grants
    }

    /// Number of committed mutating transitions.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Checks the table invariants a resumed ledger relies on.
    ///
    /// Every registry entry has exactly one existing record and vice versa.
    /// Every stored total carries the ledger's self-grant and its owner's
    /// grant, and a set aggregate carries the ledger's self-grant.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.registry.len() != self.records.len() {
            return Err(format!(
                "registry has {} principals but {} records exist",
                self.registry.len(),
                self.records.len()
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for principal in &self.registry {
            if !seen.insert(principal) {
                return Err(format!("{principal} appears twice in the registry"));
            }
            match self.records.get(principal) {
                Some(record) if record.exists => {}
                Some(_) => return Err(format!("{principal} is registered but not marked existing")),
                None => return Err(format!("{principal} is registered without a record")),
            }
        }
        for (principal, record) in &self.records {
            let total = record.encrypted_total;
            if !self.grants.allowed_self(total) {
                return Err(format!("total of {principal} lacks the ledger self-grant"));
            }
            if !self.grants.allowed_principal(total, principal) {
                return Err(format!("total of {principal} is not granted to its owner"));
            }
        }
        if !self.aggregate.is_zero() && !self.grants.allowed_self(self.aggregate) {
            return Err("aggregate lacks the ledger self-grant".to_string());
        }
        Ok(())
    }

    pub(crate) fn records(&self) -> &BTreeMap<Principal, PlayerRecord> {
        &self.records
    }

    pub(crate) fn grants_mut(&mut self) -> &mut AccessControl {
        &mut self.grants
    }

    pub(crate) fn bump_transitions(&mut self) {
        self.transitions = self.transitions.wrapping_add(1);
    }
}

/// Ledger bound to a homomorphic backend.
#[derive(Debug)]
pub struct Ledger<B> {
    pub(crate) state: LedgerState,
    pub(crate) backend: B,
    limit: RateLimit,
    events: Vec<LedgerEvent>,
}

impl<B: HomomorphicBackend> Ledger<B> {
    /// Fresh ledger at genesis.
    pub fn new(backend: B, config: &LedgerConfig) -> Self {
        Self::from_state(LedgerState::genesis(), backend, config)
    }

    /// Resumes from a previously checkpointed state.
    pub fn from_state(state: LedgerState, backend: B, config: &LedgerConfig) -> Self {
        Self {
            state,
            backend,
            limit: RateLimit::new(config.min_interval_secs),
            events: Vec::new(),
        }
    }

    /// Accumulates an encrypted contribution from `principal` at time `now`.
    ///
    /// Returns the principal's new total handle, which the principal may
    /// decrypt.  Fails with [`LedgerError::RateLimited`] when called before the
    /// minimum interval elapsed and with [`LedgerError::ProofInvalid`] when the
    /// input does not verify.
    pub fn contribute(
        &mut self,
        principal: &Principal,
        input: &EncryptedInput,
        now: Timestamp,
    ) -> LedgerResult<Handle> {
        let existing = self.state.records.get(principal);
        if let RateDecision::Blocked(retry_after) = self
            .limit
            .check(existing.map(|r| r.last_contribution_time), now)
        {
            warn!(%principal, retry_secs = retry_after.as_secs(), "contribution rate limited");
            return Err(LedgerError::RateLimited {
                principal: principal.clone(),
                retry_after,
            });
        }

        let amount = self.backend.verify_input(input, principal).map_err(|err| {
            warn!(%principal, %err, "encrypted input rejected");
            LedgerError::from(err)
        })?;

        let mut scope = self.state.grants.scope();
        scope.allow_transient(amount);

        let previous_total = match existing {
            Some(record) => record.encrypted_total,
            None => {
                let zero = self.backend.trivial_encrypt(0)?;
                scope.allow_transient(zero);
                zero
            }
        };
        let previous_aggregate = if self.state.aggregate.is_zero() {
            let zero = self.backend.trivial_encrypt(0)?;
            scope.allow_transient(zero);
            zero
        } else {
            self.state.aggregate
        };

        scope.require_self(previous_total)?;
        scope.require_self(amount)?;
        let total = self.backend.add(previous_total, amount)?;
        scope.grant_self(total);

        scope.require_self(previous_aggregate)?;
        let aggregate = self.backend.add(previous_aggregate, amount)?;
        scope.grant_self(aggregate);

        scope.grant_to(total, principal);
        let staged = scope.finish();

        // Commit point: nothing above touched the state.
        let first = existing.is_none();
        if first {
            self.state.registry.push(principal.clone());
        }
        self.state.records.insert(
            principal.clone(),
            PlayerRecord {
                encrypted_total: total,
                exists: true,
                last_contribution_time: now,
            },
        );
        self.state.aggregate = aggregate;
        let new_grants = self.state.grants.commit(staged);
        self.state.bump_transitions();
        self.events.push(LedgerEvent::Contributed {
            principal: principal.clone(),
            total,
            at: now,
            first,
        });
        debug!(%principal, ?total, first, new_grants, at = now, "contribution committed");
        Ok(total)
    }

    /// Remaining wait before `principal` may contribute at `now`, if any.
    pub fn retry_after(&self, principal: &Principal, now: Timestamp) -> Option<Duration> {
        match self.limit.check(
            self.state
                .records
                .get(principal)
                .map(|r| r.last_contribution_time),
            now,
        ) {
            RateDecision::Blocked(wait) => Some(wait),
            RateDecision::Allowed => None,
        }
    }
}

impl<B> Ledger<B> {
    /// Current encrypted total of `principal`.
    pub fn get_total(&self, principal: &Principal) -> LedgerResult<Handle> {
        self.state
            .records
            .get(principal)
            .map(|record| record.encrypted_total)
            .ok_or_else(|| LedgerError::NotFound(principal.clone()))
    }

    /// Encrypted sum of all contributions; no grant is issued by this call.
    pub fn get_aggregate(&self) -> Handle {
        self.state.aggregate
    }

    /// Number of distinct principals that contributed at least once.
    pub fn player_count(&self) -> usize {
        self.state.registry.len()
    }

    /// True if `principal` has a ledger entry.
    pub fn player_exists(&self, principal: &Principal) -> bool {
        self.state
            .records
            .get(principal)
            .map(|record| record.exists)
            .unwrap_or(false)
    }

    /// Timestamp of `principal`'s last accepted contribution.
    pub fn last_contribution_time(&self, principal: &Principal) -> LedgerResult<Timestamp> {
        self.state
            .records
            .get(principal)
            .map(|record| record.last_contribution_time)
            .ok_or_else(|| LedgerError::NotFound(principal.clone()))
    }

    /// Principals in first-contribution order.
    pub fn players(&self) -> &[Principal] {
        &self.state.registry
    }

    /// Record of `principal`, if any.
    pub fn record(&self, principal: &Principal) -> Option<&PlayerRecord> {
        self.state.records.get(principal)
    }

    /// Grant relation, as consulted by the decryption oracle.
    pub fn grants(&self) -> &AccessControl {
        &self.state.grants
    }

    /// Ledger tables.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Configured minimum interval in seconds.
    pub fn min_interval(&self) -> u64 {
        self.limit.min_interval()
    }

    /// Backend handle.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend handle, e.g. to encrypt client inputs with the reference backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Takes the notifications queued since the last call.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn push_event(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Splits the ledger into its state and backend.
    pub fn into_parts(self) -> (LedgerState, B) {
        (self.state, self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ClearBackend;

    fn ledger(min_interval: u64) -> Ledger<ClearBackend> {
        Ledger::new(
            ClearBackend::with_seed(11),
            &LedgerConfig::with_min_interval(min_interval),
        )
    }

    fn contribute(
        ledger: &mut Ledger<ClearBackend>,
        who: &str,
        amount: u32,
        at: Timestamp,
    ) -> LedgerResult<Handle> {
        let principal = Principal::new(who);
        let input = ledger.backend_mut().encrypt_input(&principal, amount);
        ledger.contribute(&principal, &input, at)
    }

    fn decrypt_total(ledger: &Ledger<ClearBackend>, who: &str) -> u32 {
        let principal = Principal::new(who);
        let handle = ledger.get_total(&principal).unwrap();
        ledger
            .backend()
            .decrypt(ledger.grants(), handle, &principal)
            .unwrap()
    }

    #[test]
    fn first_contribution_creates_entry() {
        let mut ledger = ledger(10);
        assert_eq!(ledger.min_interval(), 10);
        let alice = Principal::new("alice");
        assert!(!ledger.player_exists(&alice));
        assert_eq!(ledger.get_aggregate(), Handle::ZERO);
        contribute(&mut ledger, "alice", 10, 0).unwrap();
        assert!(ledger.player_exists(&alice));
        assert_eq!(ledger.player_count(), 1);
        assert_eq!(ledger.last_contribution_time(&alice).unwrap(), 0);
        assert_eq!(decrypt_total(&ledger, "alice"), 10);
        assert!(ledger.state().check_consistency().is_ok());
    }

    #[test]
    fn rate_limited_contribution_changes_nothing() {
        let mut ledger = ledger(10);
        contribute(&mut ledger, "alice", 10, 0).unwrap();
        let before = ledger.state().clone();
        let err = contribute(&mut ledger, "alice", 5, 5).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(ledger.state(), &before);
        assert_eq!(decrypt_total(&ledger, "alice"), 10);
        assert_eq!(
            ledger.retry_after(&Principal::new("alice"), 7),
            Some(Duration::from_secs(3))
        );
        contribute(&mut ledger, "alice", 5, 11).unwrap();
        assert_eq!(decrypt_total(&ledger, "alice"), 15);
    }

    #[test]
    fn forged_proof_is_rejected_without_mutation() {
        let mut ledger = ledger(0);
        let alice = Principal::new("alice");
        let mallory = Principal::new("mallory");
        let input = ledger.backend_mut().encrypt_input(&alice, 50);
        let err = ledger.contribute(&mallory, &input, 0).unwrap_err();
        assert!(matches!(err, LedgerError::ProofInvalid(_)));
        assert_eq!(ledger.player_count(), 0);
        assert!(ledger.grants().is_empty());
        assert!(ledger.drain_events().is_empty());
    }

    #[test]
    fn backend_failure_aborts_whole_transition() {
        let mut ledger = ledger(0);
        contribute(&mut ledger, "alice", 1, 0).unwrap();
        let before = ledger.state().clone();
        let alice = Principal::new("alice");
        let input = ledger.backend_mut().encrypt_input(&alice, 2);
        // verify_input and the total add succeed, the aggregate add fails.
        ledger.backend_mut().fail_after(2);
        let err = ledger.contribute(&alice, &input, 1).unwrap_err();
        assert!(matches!(err, LedgerError::Backend(_)));
        assert_eq!(ledger.state(), &before);
        ledger.backend_mut().heal();
        ledger.contribute(&alice, &input, 2).unwrap();
        assert_eq!(decrypt_total(&ledger, "alice"), 3);
    }

    #[test]
    fn totals_are_granted_only_to_their_owner() {
        let mut ledger = ledger(0);
        contribute(&mut ledger, "alice", 4, 0).unwrap();
        contribute(&mut ledger, "bob", 6, 0).unwrap();
        let alice_total = ledger.get_total(&Principal::new("alice")).unwrap();
        assert!(ledger
            .backend()
            .decrypt(ledger.grants(), alice_total, &Principal::new("bob"))
            .is_err());
        assert!(ledger.grants().allowed_self(alice_total));
        assert!(ledger.grants().allowed_self(ledger.get_aggregate()));
        assert_eq!(ledger.backend().peek(ledger.get_aggregate()), Some(10));
    }

    #[test]
    fn each_contribution_yields_a_fresh_total_handle() {
        let mut ledger = ledger(0);
        let first = contribute(&mut ledger, "alice", 0, 0).unwrap();
        let second = contribute(&mut ledger, "alice", 0, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(decrypt_total(&ledger, "alice"), 0);
    }

    #[test]
    fn unknown_principal_queries_fail() {
        let ledger = ledger(10);
        let ghost = Principal::new("ghost");
        assert_eq!(
            ledger.get_total(&ghost),
            Err(LedgerError::NotFound(ghost.clone()))
        );
        assert!(ledger.last_contribution_time(&ghost).is_err());
        assert!(ledger.record(&ghost).is_none());
    }

    #[test]
    fn consistency_requires_standing_grants() {
        let mut ledger = ledger(0);
        contribute(&mut ledger, "alice", 4, 0).unwrap();
        contribute(&mut ledger, "bob", 6, 1).unwrap();
        assert!(ledger.state().check_consistency().is_ok());

        let mut bare = ledger.state().clone();
        bare.grants = AccessControl::default();
        let err = bare.check_consistency().unwrap_err();
        assert!(err.contains("self-grant"), "{err}");

        // Ledger grants kept, owner grants dropped.
        let mut ownerless = ledger.state().clone();
        let empty = AccessControl::new();
        let mut scope = empty.scope();
        for record in ownerless.records.values() {
            scope.grant_self(record.encrypted_total);
        }
        scope.grant_self(ownerless.aggregate);
        let staged = scope.finish();
        ownerless.grants = AccessControl::new();
        ownerless.grants.commit(staged);
        let err = ownerless.check_consistency().unwrap_err();
        assert!(err.contains("owner"), "{err}");

        let mut no_aggregate = ledger.state().clone();
        no_aggregate.aggregate = ledger.get_total(&Principal::new("alice")).unwrap();
        assert!(no_aggregate.check_consistency().is_ok());
        no_aggregate.aggregate = Handle::from_bytes([7u8; 32]);
        assert_eq!(
            no_aggregate.check_consistency(),
            Err("aggregate lacks the ledger self-grant".to_string())
        );
    }

    #[test]
    fn registry_keeps_first_contribution_order() {
        let mut ledger = ledger(0);
        for (who, at) in [("carol", 0), ("alice", 1), ("carol", 2), ("bob", 3)] {
            contribute(&mut ledger, who, 1, at).unwrap();
        }
        let order: Vec<&str> = ledger.players().iter().map(|p| p.as_str()).collect();
        assert_eq!(order, vec!["carol", "alice", "bob"]);
        let events = ledger.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[2], LedgerEvent::Contributed { first: false, .. }));
        assert_eq!(ledger.state().transitions(), 4);
    }
}
