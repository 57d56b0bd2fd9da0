//! Seam to the external homomorphic encryption scheme.
//!
//! The ledger never sees cleartext.  It asks a [`HomomorphicBackend`] to
//! combine ciphertexts and receives fresh handles back.  Every call is a
//! blocking request/response; an error aborts the enclosing transition.

use crate::{Handle, Principal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ciphertext submitted by a client together with the scheme's input proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// Handle of the submitted ciphertext.
    pub handle: Handle,
    /// Opaque proof produced by the client-side encryptor.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

/// Failures reported by the encryption backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The input proof did not verify for the submitting principal.
    #[error("input proof rejected: {0}")]
    ProofRejected(String),
    /// The handle is not known to the backend.
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(Handle),
    /// An operand had the wrong encrypted type (e.g. a boolean where a u32 was expected).
    #[error("type mismatch on handle {handle}: expected {expected}")]
    TypeMismatch {
        /// Offending handle.
        handle: Handle,
        /// Encrypted type the operation required.
        expected: &'static str,
    },
    /// Decryption requested for the uninitialized sentinel.
    #[error("handle is uninitialized")]
    Uninitialized,
    /// Decryption requested by a principal without a grant.
    #[error("{principal} holds no grant for handle {handle}")]
    NotAuthorized {
        /// Requested handle.
        handle: Handle,
        /// Requesting principal.
        principal: Principal,
    },
    /// The backend could not serve the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Homomorphic operations over encrypted 32-bit unsigned integers.
///
/// Implementations must return a fresh handle for every result, even when the
/// cleartext is unchanged.
pub trait HomomorphicBackend {
    /// Verifies a client input bound to `sender` and returns the handle the
    /// ledger may operate on.
    fn verify_input(
        &mut self,
        input: &EncryptedInput,
        sender: &Principal,
    ) -> Result<Handle, BackendError>;

    /// Encrypts a public constant.
    fn trivial_encrypt(&mut self, value: u32) -> Result<Handle, BackendError>;

    /// `a + b mod 2^32`.
    fn add(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError>;

    /// Encrypted boolean `a > b`.
    fn gt(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError>;

    /// `cond ? a : b`, where `cond` is an encrypted boolean.
    fn select(&mut self, cond: Handle, a: Handle, b: Handle) -> Result<Handle, BackendError>;
}

impl<B: HomomorphicBackend + ?Sized> HomomorphicBackend for &mut B {
    fn verify_input(
        &mut self,
        input: &EncryptedInput,
        sender: &Principal,
    ) -> Result<Handle, BackendError> {
        (**self).verify_input(input, sender)
    }

    fn trivial_encrypt(&mut self, value: u32) -> Result<Handle, BackendError> {
        (**self).trivial_encrypt(value)
    }

    fn add(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        (**self).add(a, b)
    }

    fn gt(&mut self, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        (**self).gt(a, b)
    }

    fn select(&mut self, cond: Handle, a: Handle, b: Handle) -> Result<Handle, BackendError> {
        (**self).select(cond, a, b)
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(de::Error::custom)
    }
}
