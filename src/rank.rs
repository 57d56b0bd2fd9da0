//! Encrypted competitive ranking.
//!
//! The rank of principal `P` is `1 + |{ j != P : total_j > total_P }|`,
//! computed entirely under encryption by one homomorphic comparison per
//! registered principal.  Comparison is strict, so tied principals never
//! count against each other and receive the same rank; ranks across the
//! ledger may repeat and skip values.
//!
//! The scan is O(n) backend comparisons and is the most expensive transition
//! the ledger offers.  It runs only when a caller asks for it.

use crate::acl::GrantScope;
use crate::backend::HomomorphicBackend;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::Ledger;
use crate::{Handle, Principal};
use tracing::debug;

/// Encrypted count of `others` strictly greater than `target`.
///
/// `zero` and `one` are encryptions of the constants, reused across
/// iterations.  All intermediate handles receive transient self-grants in
/// `scope`; every operand must already be usable by the ledger.
pub fn count_strictly_greater<B, I>(
    backend: &mut B,
    scope: &mut GrantScope<'_>,
    target: Handle,
    others: I,
    zero: Handle,
    one: Handle,
) -> LedgerResult<Handle>
where
    B: HomomorphicBackend + ?Sized,
    I: IntoIterator<Item = Handle>,
{
    scope.require_self(target)?;
    scope.require_self(zero)?;
    scope.require_self(one)?;
    let mut count = zero;
    for other in others {
        scope.require_self(other)?;
        let is_greater = backend.gt(other, target)?;
        scope.allow_transient(is_greater);
        let increment = backend.select(is_greater, one, zero)?;
        scope.allow_transient(increment);
        count = backend.add(count, increment)?;
        scope.allow_transient(count);
    }
    Ok(count)
}

impl<B: HomomorphicBackend> Ledger<B> {
    /// Computes `principal`'s encrypted 1-indexed rank and grants it to them.
    ///
    /// Each call produces a new handle and a new grant.  Fails with
    /// [`LedgerError::NotFound`] if `principal` never contributed.
    pub fn calculate_rank(&mut self, principal: &Principal) -> LedgerResult<Handle> {
        let target = self.get_total(principal)?;
        let records = self.state.records();
        let others = self
            .state
            .registry()
            .iter()
            .filter(|other| *other != principal)
            .map(|other| {
                records
                    .get(other)
                    .map(|record| record.encrypted_total)
                    .ok_or_else(|| LedgerError::NotFound(other.clone()))
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        let mut scope = self.state.grants().scope();
        let zero = self.backend.trivial_encrypt(0)?;
        scope.allow_transient(zero);
        let one = self.backend.trivial_encrypt(1)?;
        scope.allow_transient(one);

        let compared = others.len();
        let count =
            count_strictly_greater(&mut self.backend, &mut scope, target, others, zero, one)?;
        let rank = self.backend.add(count, one)?;
        scope.grant_self(rank);
        scope.grant_to(rank, principal);
        let staged = scope.finish();

        self.state.grants_mut().commit(staged);
        self.state.bump_transitions();
        self.push_event(LedgerEvent::RankComputed {
            principal: principal.clone(),
            rank,
        });
        debug!(%principal, compared, ?rank, "rank computed");
        Ok(rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::reference::ClearBackend;
    use crate::Timestamp;

    fn seeded(entries: &[(&str, u32)]) -> Ledger<ClearBackend> {
        let mut ledger = Ledger::new(
            ClearBackend::with_seed(21),
            &LedgerConfig::with_min_interval(0),
        );
        for (i, (who, amount)) in entries.iter().enumerate() {
            let principal = Principal::new(*who);
            let input = ledger.backend_mut().encrypt_input(&principal, *amount);
            ledger
                .contribute(&principal, &input, i as Timestamp)
                .unwrap();
        }
        ledger
    }

    fn rank_of(ledger: &mut Ledger<ClearBackend>, who: &str) -> u32 {
        let principal = Principal::new(who);
        let rank = ledger.calculate_rank(&principal).unwrap();
        ledger
            .backend()
            .decrypt(ledger.grants(), rank, &principal)
            .unwrap()
    }

    #[test]
    fn sole_player_ranks_first() {
        let mut ledger = seeded(&[("alice", 3)]);
        assert_eq!(rank_of(&mut ledger, "alice"), 1);
    }

    #[test]
    fn rank_counts_strictly_greater_totals() {
        let mut ledger = seeded(&[("a", 5), ("b", 9), ("c", 1), ("d", 7)]);
        assert_eq!(rank_of(&mut ledger, "b"), 1);
        assert_eq!(rank_of(&mut ledger, "d"), 2);
        assert_eq!(rank_of(&mut ledger, "a"), 3);
        assert_eq!(rank_of(&mut ledger, "c"), 4);
    }

    #[test]
    fn ties_share_a_rank_and_leave_gaps() {
        let mut ledger = seeded(&[("a", 4), ("b", 8), ("c", 8), ("d", 2)]);
        assert_eq!(rank_of(&mut ledger, "b"), 1);
        assert_eq!(rank_of(&mut ledger, "c"), 1);
        assert_eq!(rank_of(&mut ledger, "a"), 3);
        assert_eq!(rank_of(&mut ledger, "d"), 4);
    }

    #[test]
    fn unknown_principal_has_no_rank() {
        let mut ledger = seeded(&[("a", 1)]);
        let grants_before = ledger.grants().len();
        let err = ledger.calculate_rank(&Principal::new("zed")).unwrap_err();
        assert_eq!(err, LedgerError::NotFound(Principal::new("zed")));
        assert_eq!(ledger.grants().len(), grants_before);
    }

    #[test]
    fn every_call_issues_a_new_granted_handle() {
        let mut ledger = seeded(&[("a", 1), ("b", 2)]);
        let a = Principal::new("a");
        let first = ledger.calculate_rank(&a).unwrap();
        let second = ledger.calculate_rank(&a).unwrap();
        assert_ne!(first, second);
        assert!(ledger.grants().allowed_principal(first, &a));
        assert!(ledger.grants().allowed_principal(second, &a));
        assert!(ledger.grants().allowed_self(second));
        assert!(!ledger.grants().allowed_principal(second, &Principal::new("b")));
        let events = ledger.drain_events();
        assert_eq!(events.len(), 4);
        assert!(events[2..].iter().all(|event| event.principal() == &a));
    }

    #[test]
    fn failed_scan_commits_no_grant() {
        let mut ledger = seeded(&[("a", 1), ("b", 2), ("c", 3)]);
        let grants_before = ledger.grants().len();
        // Two constants and one comparison succeed, then the select fails.
        ledger.backend_mut().fail_after(3);
        assert!(matches!(
            ledger.calculate_rank(&Principal::new("a")),
            Err(LedgerError::Backend(_))
        ));
        assert_eq!(ledger.grants().len(), grants_before);
        assert!(ledger.drain_events().iter().all(|event| matches!(
            event,
            LedgerEvent::Contributed { .. }
        )));
    }

    #[test]
    fn ungranted_operand_is_an_invariant_violation() {
        let mut backend = ClearBackend::with_seed(5);
        let acl = crate::acl::AccessControl::new();
        let mut scope = acl.scope();
        let zero = backend.trivial_encrypt(0).unwrap();
        let one = backend.trivial_encrypt(1).unwrap();
        let target = backend.trivial_encrypt(3).unwrap();
        scope.allow_transient(zero);
        scope.allow_transient(one);
        scope.allow_transient(target);
        let stray = backend.trivial_encrypt(9).unwrap();
        let err =
            count_strictly_greater(&mut backend, &mut scope, target, [stray], zero, one).unwrap_err();
        assert_eq!(err, LedgerError::GrantMissing { handle: stray });
    }
}
