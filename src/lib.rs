#![deny(missing_docs)]

//! # veiled_ledger
//!
//! A privacy-preserving contribution ledger.  Principals submit encrypted
//! amounts; the ledger keeps an encrypted running total per principal and an
//! encrypted global aggregate, and computes an encrypted competitive rank on
//! request.  The ledger operator never sees a cleartext value: all arithmetic
//! is delegated to a [`HomomorphicBackend`], and cleartext is released only
//! by an external decryption oracle to principals holding a grant in the
//! ledger's [`AccessControl`] registry.
//!
//! ## Features
//!
//! * **Encrypted accumulation**: [`Ledger::contribute`] adds a verified
//!   ciphertext into the caller's total and the global aggregate in one
//!   atomic transition, rate limited per principal.
//! * **Capability grants**: every handle the ledger produces is self-granted
//!   so it stays usable, and totals/ranks are granted to their owner.
//!   Grants are append-only.
//! * **Encrypted ranking**: [`Ledger::calculate_rank`] compares the caller
//!   against every registered principal under encryption and returns a
//!   1-indexed rank where ties share a value.
//! * **Checkpoints and state roots**: [`LedgerCheckpoint`] persists the four
//!   ledger tables, and [`state_root`] commits to them for replica
//!   comparison.
//! * **Reference backend**: [`ClearBackend`] simulates the encryption
//!   service, input proofs and the decryption oracle for tests and demos.
//!
//! ## Usage
//!
//! ```rust
//! use veiled_ledger::{ClearBackend, Ledger, LedgerConfig, Principal};
//!
//! let mut ledger = Ledger::new(ClearBackend::with_seed(1), &LedgerConfig::with_min_interval(10));
//! let alice = Principal::new("alice");
//! let input = ledger.backend_mut().encrypt_input(&alice, 10);
//! let total = ledger.contribute(&alice, &input, 0).unwrap();
//! let clear = ledger.backend().decrypt(ledger.grants(), total, &alice).unwrap();
//! assert_eq!(clear, 10);
//!
//! let rank = ledger.calculate_rank(&alice).unwrap();
//! assert_eq!(ledger.backend().decrypt(ledger.grants(), rank, &alice).unwrap(), 1);
//! ```

pub mod acl;
pub mod backend;
pub mod checkpoint;
pub mod config;
mod error;
mod events;
mod handle;
pub mod ledger;
pub mod merkle;
pub mod rank;
pub mod rate_limit;
pub mod reference;
mod types;

pub use acl::{AccessControl, Grant, GrantScope, Grantee};
pub use backend::{BackendError, EncryptedInput, HomomorphicBackend};
pub use checkpoint::{
    latest_checkpoint, load_checkpoint, write_checkpoint, CheckpointError, LedgerCheckpoint,
};
pub use config::{ConfigError, LedgerConfig};
pub use error::{LedgerError, LedgerResult};
pub use events::LedgerEvent;
pub use handle::{Handle, HANDLE_LEN};
pub use ledger::{Ledger, LedgerState, PlayerRecord};
pub use merkle::{record_proof, state_root, verify_proof, MerkleProof};
pub use rank::count_strictly_greater;
pub use rate_limit::{check_rate_limit, RateDecision, RateLimit};
pub use reference::ClearBackend;
pub use types::{Principal, Timestamp};
