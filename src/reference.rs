//! In-process reference backend.
//!
//! [`ClearBackend`] simulates the encryption service the ledger talks to.
//! Cleartexts live in a private table keyed by randomly drawn handles, so
//! equal values never share handle bytes.  It also plays the client-side
//! encryptor (issuing inputs with a keyed proof) and the decryption oracle
//! (releasing cleartext only to grant holders).  It provides no secrecy and
//! exists for tests, replays and demos.

use crate::acl::AccessControl;
use crate::backend::{BackendError, EncryptedInput, HomomorphicBackend};
use crate::{Handle, Principal};
use blake2::digest::{consts::U32, Digest};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;

type Blake2b256 = blake2::Blake2b<U32>;

const HANDLE_DOMAIN: &[u8] = b"VEIL_HANDLE";
const PROOF_DOMAIN: &[u8] = b"VEIL_INPUT_PROOF";
const KEY_DOMAIN: &[u8] = b"VEIL_PROOF_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plaintext {
    U32(u32),
    Bool(bool),
}

/// Simulated homomorphic backend with an ACL-gated decryption oracle.
#[derive(Debug)]
pub struct ClearBackend {
    values: HashMap<Handle, Plaintext>,
    rng: StdRng,
    proof_key: [u8; 32],
    counter: u64,
    fuel: Option<u64>,
}

impl ClearBackend {
    /// Backend seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic backend; two instances with the same seed issue the same handles.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let mut material = [0u8; 32];
        rng.fill_bytes(&mut material);
        let mut hasher = Blake2b256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(material);
        Self {
            values: HashMap::new(),
            rng,
            proof_key: hasher.finalize().into(),
            counter: 0,
            fuel: None,
        }
    }

    /// Makes the backend fail every operation after `ops` more succeed.
    pub fn fail_after(&mut self, ops: u64) {
        self.fuel = Some(ops);
    }

    /// Removes an injected failure.
    pub fn heal(&mut self) {
        self.fuel = None;
    }

    /// Number of ciphertexts held.
    pub fn ciphertext_count(&self) -> usize {
        self.values.len()
    }

    /// Client-side encryption: produces an input bound to `sender`.
    pub fn encrypt_input(&mut self, sender: &Principal, value: u32) -> EncryptedInput {
        let handle = self.store(Plaintext::U32(value));
        let proof = self.input_mac(handle, sender).to_vec();
        EncryptedInput { handle, proof }
    }

    /// Decryption oracle: cleartext of `handle` if `requester` holds a grant on it.
    pub fn decrypt(
        &self,
        acl: &AccessControl,
        handle: Handle,
        requester: &Principal,
    ) -> Result<u32, BackendError> {
        if handle.is_zero() {
            return Err(BackendError::Uninitialized);
        }
        if !acl.allowed_principal(handle, requester) {
            return Err(BackendError::NotAuthorized {
                handle,
                principal: requester.clone(),
            });
        }
        self.load_u32(handle)
    }

    /// Cleartext without an ACL check; for operators of this simulated backend only.
    pub fn peek(&self, handle: Handle) -> Option<u32> {
        match self.values.get(&handle) {
            Some(Plaintext::U32(value)) => Some(*value),
            _ => None,
        }
    }

    fn charge(&mut self) -> Result<(), BackendError> {
        match self.fuel {
            Some(0) => Err(BackendError::Unavailable("injected failure".into())),
            Some(left) => {
                self.fuel = Some(left - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn store(&mut self, value: Plaintext) -> Handle {
        loop {
            let mut nonce = [0u8; 32];
            self.rng.fill_bytes(&mut nonce);
            let mut hasher = Blake2b256::new();
            hasher.update(HANDLE_DOMAIN);
            hasher.update(self.counter.to_be_bytes());
            hasher.update(nonce);
            self.counter = self.counter.wrapping_add(1);
            let handle = Handle::from_bytes(hasher.finalize().into());
            if !handle.is_zero() && !self.values.contains_key(&handle) {
                self.values.insert(handle, value);
                return handle;
            }
        }
    }

    fn input_mac(&self, handle: Handle, sender: &Principal) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(self.proof_key);
        hasher.update(handle.as_bytes());
        hasher.update((sender.as_str().len() as u64).to_be_bytes());
        hasher.update(sender.as_str().as_bytes());
        hasher.finalize().into()
    }

    fn load(&self, handle: Handle) -> Result<Plaintext, BackendError> {
        if handle.is_zero() {
            return Err(BackendError::Uninitialized);
        }
        self.values
            .get(&handle)
            .copied()
            .ok_or(BackendError::UnknownHandle(handle))
    }

    fn load_u32(&self, handle: Handle) -> Result<u32, BackendError> {
        match self.load(handle)? {
            Plaintext::U32(value) => Ok(value),
            Plaintext::Bool(_) => Err(BackendError::TypeMismatch {
                handle,
                expected: "u32",
            }),
        }
    }

    fn load_bool(&self, handle: Handle) -> Result<bool, BackendError> {
        match self.load(handle)? {
            Plaintext::Bool(value) => Ok(value),
            Plaintext::U32(_) => Err(BackendError::TypeMismatch {
                handle,
                expected: "bool",
            }),
        }
    }
}

impl Default for ClearBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HomomorphicBackend for ClearBackend {
    fn verify_input(
        &mut self,
        input: &EncryptedInput,
        sender: &Principal,
    ) -> Result<Handle, BackendError> {
        self.charge()?;
        if input.proof.len() != 32 || input.proof[..] != self.input_mac(input.handle, sender)[..] {
            return Err(BackendError::ProofRejected(format!(
                "proof does not bind {} to {sender}",
                input.handle
            )));
        }
        self.load_u32(input.handle)
            .map_err(|err| BackendError::ProofRejected(err.to_string()))?;
        Ok(input.handle)
    }

    fn trivial_encrypt(&mut self, value: u32) -> Result<Handle, BackendError> {
        self.charge()?;
        Ok(self.store(Plaintext::U32(value)))
    }

    fn add(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        self.charge()?;
        let sum = self.load_u32(a)?.wrapping_add(self.load_u32(b)?);
        Ok(self.store(Plaintext::U32(sum)))
    }

    fn gt(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        self.charge()?;
        let greater = self.load_u32(a)? > self.load_u32(b)?;
        Ok(self.store(Plaintext::Bool(greater)))
    }

    fn select(&mut self, cond: Handle, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        self.charge()?;
        let picked = if self.load_bool(cond)? {
            self.load_u32(a)?
        } else {
            self.load_u32(b)?
        };
        Ok(self.store(Plaintext::U32(picked)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_get_distinct_handles() {
        let mut backend = ClearBackend::with_seed(7);
        let a = backend.trivial_encrypt(5).unwrap();
        let b = backend.trivial_encrypt(5).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.peek(a), backend.peek(b));
    }

    #[test]
    fn every_operation_stores_a_ciphertext() {
        let mut backend = ClearBackend::with_seed(4);
        assert_eq!(backend.ciphertext_count(), 0);
        let input = backend.encrypt_input(&Principal::new("alice"), 9);
        let one = backend.trivial_encrypt(1).unwrap();
        backend.add(input.handle, one).unwrap();
        assert_eq!(backend.ciphertext_count(), 3);
    }

    #[test]
    fn seeded_backends_are_deterministic() {
        let mut one = ClearBackend::with_seed(99);
        let mut two = ClearBackend::with_seed(99);
        assert_eq!(one.trivial_encrypt(1).unwrap(), two.trivial_encrypt(1).unwrap());
    }

    #[test]
    fn add_wraps_around() {
        let mut backend = ClearBackend::with_seed(1);
        let a = backend.trivial_encrypt(u32::MAX).unwrap();
        let b = backend.trivial_encrypt(2).unwrap();
        let c = backend.add(a, b).unwrap();
        assert_eq!(backend.peek(c), Some(1));
    }

    #[test]
    fn comparison_and_select() {
        let mut backend = ClearBackend::with_seed(2);
        let three = backend.trivial_encrypt(3).unwrap();
        let four = backend.trivial_encrypt(4).unwrap();
        let cond = backend.gt(four, three).unwrap();
        assert_eq!(backend.peek(cond), None);
        let picked = backend.select(cond, four, three).unwrap();
        assert_eq!(backend.peek(picked), Some(4));
        let tie = backend.gt(three, three).unwrap();
        let picked = backend.select(tie, four, three).unwrap();
        assert_eq!(backend.peek(picked), Some(3));
        assert!(matches!(
            backend.select(three, four, three),
            Err(BackendError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn input_proof_is_bound_to_sender() {
        let mut backend = ClearBackend::with_seed(3);
        let alice = Principal::new("alice");
        let input = backend.encrypt_input(&alice, 10);
        assert_eq!(backend.verify_input(&input, &alice).unwrap(), input.handle);
        assert!(matches!(
            backend.verify_input(&input, &Principal::new("mallory")),
            Err(BackendError::ProofRejected(_))
        ));
        let forged = EncryptedInput {
            handle: input.handle,
            proof: vec![0u8; 32],
        };
        assert!(backend.verify_input(&forged, &alice).is_err());
    }

    #[test]
    fn oracle_requires_grant_and_refuses_sentinel() {
        let mut backend = ClearBackend::with_seed(4);
        let alice = Principal::new("alice");
        let handle = backend.trivial_encrypt(8).unwrap();
        let mut acl = AccessControl::new();
        assert!(matches!(
            backend.decrypt(&acl, handle, &alice),
            Err(BackendError::NotAuthorized { .. })
        ));
        let mut scope = acl.scope();
        scope.grant_to(handle, &alice);
        let staged = scope.finish();
        acl.commit(staged);
        assert_eq!(backend.decrypt(&acl, handle, &alice).unwrap(), 8);
        assert_eq!(
            backend.decrypt(&acl, Handle::ZERO, &alice),
            Err(BackendError::Uninitialized)
        );
    }

    #[test]
    fn injected_failure_trips_after_budget() {
        let mut backend = ClearBackend::with_seed(5);
        backend.fail_after(1);
        assert!(backend.trivial_encrypt(1).is_ok());
        assert!(matches!(
            backend.trivial_encrypt(2),
            Err(BackendError::Unavailable(_))
        ));
        backend.heal();
        assert!(backend.trivial_encrypt(3).is_ok());
    }
}
