//! Tenant key derivation and the shard-map key transform.
//!
//! A tenant's identity is derived from its human name: the name is lowercased,
//! stripped of whitespace, and hashed to a fixed-width byte sequence. Those
//! bytes are the *normalized key* stored and ordered by the shard registry's
//! index. Application code works with a signed 32-bit projection of the
//! normalized key instead, computed by [`project_key`].
//!
//! The projection reproduces the registry index convention exactly: the index
//! stores keys so that unsigned lexicographic byte order matches signed
//! integer order, which requires the sign bit of the first byte to be flipped.
//! [`project_key`] undoes the flip and reads the first four bytes in network
//! (big-endian) byte order. Both sides of the transform live here so the
//! registry and the application can never disagree about a tenant's identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of a normalized tenant key in bytes.
pub const NORMALIZED_KEY_LEN: usize = 16;

/// Fixed namespace for name-based tenant key derivation.
///
/// Changing this value changes every derived key and orphans all persisted
/// shard mappings; it is part of the on-disk format.
const TENANT_KEY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x61, 0x72, 0x71, 0x75, 0x65, 0x65, 0x2d, 0x74, 0x65, 0x6e, 0x61, 0x6e, 0x74, 0x2d,
    0x31,
]);

/// The signed 32-bit shard key used to look up a tenant's owning shard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantKey(i32);

impl TenantKey {
    /// Create a tenant key from its integer value.
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Get the integer value.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// The first four bytes of the normalized index representation of this
    /// key: big-endian with the sign bit flipped.
    pub fn normalized_prefix(self) -> [u8; 4] {
        normalize_key(self.0)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TenantKey {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// A tenant's durable identity: the fixed-width normalized key stored by the
/// shard registry, created once at onboarding and immutable thereafter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantIdentity {
    normalized: [u8; NORMALIZED_KEY_LEN],
}

impl TenantIdentity {
    /// Derive the identity for a tenant name.
    ///
    /// Names differing only by case or whitespace derive the same identity,
    /// so "Acme" and " ACME " can never provision two shards. The derivation
    /// is a pure function; an empty name still yields a deterministic value,
    /// and callers are expected to reject empty names before getting here.
    pub fn derive(tenant_name: &str) -> Self {
        let normalized_name = normalize_name(tenant_name);
        let digest = Uuid::new_v5(&TENANT_KEY_NAMESPACE, normalized_name.as_bytes());
        Self {
            normalized: *digest.as_bytes(),
        }
    }

    /// Reconstruct an identity from its stored normalized key.
    pub const fn from_normalized(normalized: [u8; NORMALIZED_KEY_LEN]) -> Self {
        Self { normalized }
    }

    /// The normalized key bytes as stored by the registry index.
    pub const fn normalized(&self) -> &[u8; NORMALIZED_KEY_LEN] {
        &self.normalized
    }

    /// The signed 32-bit projection used as the tenant's lookup handle.
    pub fn key(&self) -> TenantKey {
        TenantKey(project_key(&self.normalized))
    }

    /// Hex rendering of the normalized key, for display and diagnostics.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(NORMALIZED_KEY_LEN * 2);
        for byte in self.normalized {
            use fmt::Write;
            let _ = write!(out, "{byte:02X}");
        }
        out
    }
}

impl fmt::Debug for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantIdentity")
            .field("key", &self.key().value())
            .field("normalized", &self.to_hex())
            .finish()
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Normalize a tenant name: lowercase, all whitespace removed.
pub fn normalize_name(tenant_name: &str) -> String {
    tenant_name
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Project a normalized key onto its signed 32-bit tenant key.
///
/// Copies the key, flips the sign bit of the first byte (the index stores
/// keys in unsigned lexicographic order), and reads the first four bytes as a
/// big-endian `i32`. This must stay bit-for-bit identical to the registry's
/// own decode or routing silently breaks.
///
/// # Panics
///
/// Panics if `normalized` is shorter than four bytes; normalized keys are
/// always [`NORMALIZED_KEY_LEN`] bytes.
pub fn project_key(normalized: &[u8]) -> i32 {
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&normalized[..4]);
    prefix[0] ^= 0x80;
    i32::from_be_bytes(prefix)
}

/// Encode a tenant key into the first four bytes of its normalized index
/// form: big-endian with the sign bit flipped. Inverse of [`project_key`].
pub fn normalize_key(key: i32) -> [u8; 4] {
    let mut bytes = key.to_be_bytes();
    bytes[0] ^= 0x80;
    bytes
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = TenantIdentity::derive("Test Tenant 1");
        let b = TenantIdentity::derive("Test Tenant 1");
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_case_and_whitespace_normalize_to_same_identity() {
        let base = TenantIdentity::derive("Acme");
        assert_eq!(TenantIdentity::derive("ACME "), base);
        assert_eq!(TenantIdentity::derive(" a c m e"), base);
        assert_eq!(TenantIdentity::derive("AcMe\t"), base);
    }

    #[test]
    fn test_distinct_names_derive_distinct_keys() {
        let a = TenantIdentity::derive("contoso concert hall");
        let b = TenantIdentity::derive("fabrikam jazz club");
        assert_ne!(a, b);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_projection_round_trips() {
        for key in [0, 1, -1, 42, i32::MIN, i32::MAX, 397_858_529, -397_858_529] {
            assert_eq!(project_key(&normalize_key(key)), key);
        }
    }

    #[test]
    fn test_sign_flip_preserves_ordering() {
        // The whole point of the flip: unsigned byte order of the normalized
        // form must match signed order of the projected integers.
        let mut keys = [i32::MIN, -5, -1, 0, 1, 7, i32::MAX];
        let mut encoded: Vec<[u8; 4]> = keys.iter().map(|k| normalize_key(*k)).collect();
        keys.sort_unstable();
        encoded.sort_unstable();
        let decoded: Vec<i32> = encoded.iter().map(|b| project_key(b)).collect();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn test_projection_matches_identity_key() {
        let identity = TenantIdentity::derive("Test Tenant 1");
        assert_eq!(project_key(identity.normalized()), identity.key().value());
    }

    #[test]
    fn test_known_derivation_vector_is_stable() {
        // Pins the derived key for a fixed name so an accidental change to
        // the namespace, the hash, or the normalization shows up as a test
        // failure, not as silently orphaned shard mappings. The expected
        // values were computed independently (UUIDv5 over the namespace
        // bytes and "testtenant1").
        let identity = TenantIdentity::derive("Test Tenant 1");
        assert_eq!(identity.to_hex(), "A1F1022901FF5AEBB3EECD5C34D649BC");
        assert_eq!(identity.key().value(), 569_442_857);

        let again = TenantIdentity::from_normalized(*identity.normalized());
        assert_eq!(again.key(), identity.key());
    }

    #[test]
    fn test_empty_name_is_deterministic() {
        assert_eq!(TenantIdentity::derive(""), TenantIdentity::derive("   "));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Test Tenant 1"), "testtenant1");
        assert_eq!(normalize_name("  VENUE  "), "venue");
        assert_eq!(normalize_name(""), "");
    }
}
