//! Opaque ciphertext handles.
//!
//! A [`Handle`] names an encrypted value held by the homomorphic backend.  The
//! scheme is semantically secure, so two handles with different bytes may
//! still encrypt the same cleartext; comparing handle bytes only answers
//! "is this the same ciphertext", never "is this the same value".

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Length of a handle in bytes.
pub const HANDLE_LEN: usize = 32;

/// Opaque reference to an encrypted value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle([u8; HANDLE_LEN]);

impl Handle {
    /// Reserved all-zero sentinel meaning "no handle / uninitialized".
    pub const ZERO: Handle = Handle([0u8; HANDLE_LEN]);

    /// Wraps raw handle bytes.
    pub const fn from_bytes(bytes: [u8; HANDLE_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw handle bytes.
    pub fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }

    /// Returns true for the uninitialized sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HANDLE_LEN]
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(input: &str) -> Result<Self, String> {
        let bytes = hex::decode(input.trim()).map_err(|err| format!("bad handle hex: {err}"))?;
        if bytes.len() != HANDLE_LEN {
            return Err(format!(
                "handle must be {HANDLE_LEN} bytes, got {}",
                bytes.len()
            ));
        }
        let mut out = [0u8; HANDLE_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps transition logs readable.
        write!(f, "Handle({}..)", &self.to_hex()[..12])
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Handle::from_hex(&raw).map_err(de::Error::custom)
    }
}
