//! Vault keyring
//!
//! Holds every key version the vault may still need for decryption, plus
//! the single active version used for new encryption. Multiple valid
//! decryption versions allow gradual rotation across the whole credential
//! population; a version absent from the ring means the key was retired
//! and any credential still encrypted under it needs operator intervention.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{CadenceError, Result};
use crate::vault::crypto::KEY_LEN;

/// A single vault key, zeroized when the ring is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct VaultKey([u8; KEY_LEN]);

/// Registry of vault keys by version.
pub struct Keyring {
    keys: HashMap<u32, VaultKey>,
    active_version: u32,
}

impl Keyring {
    /// Parse a keyring from its configured form.
    ///
    /// `spec` is a comma-separated list of `version:base64-key` entries,
    /// e.g. `"1:q83v...,2:mN4x..."`; each key must decode to 32 bytes.
    /// `active_version` must name one of the entries.
    pub fn parse(spec: &str, active_version: u32) -> Result<Self> {
        let mut keys = HashMap::new();

        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (version, encoded) = entry.split_once(':').ok_or_else(|| {
                CadenceError::Config(format!(
                    "Vault key entry '{entry}' is not of the form version:base64"
                ))
            })?;

            let version: u32 = version.parse().map_err(|_| {
                CadenceError::Config(format!("Vault key version '{version}' is not an integer"))
            })?;

            let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
                CadenceError::Config(format!("Vault key v{version} is not valid base64: {e}"))
            })?;

            let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
                CadenceError::Config(format!("Vault key v{version} must be {KEY_LEN} bytes"))
            })?;

            if keys.insert(version, VaultKey(key)).is_some() {
                return Err(CadenceError::Config(format!(
                    "Duplicate vault key version {version}"
                )));
            }
        }

        if keys.is_empty() {
            return Err(CadenceError::Config("No vault keys configured".into()));
        }
        if !keys.contains_key(&active_version) {
            return Err(CadenceError::Config(format!(
                "Active vault key version {active_version} is not in the keyring"
            )));
        }

        Ok(Self {
            keys,
            active_version,
        })
    }

    /// Fixed single-key ring for local development. Deterministic and
    /// insecure on purpose, mirroring the dev-only defaults elsewhere.
    pub fn dev() -> Self {
        let digest = Sha256::digest(b"cadence-dev-only-vault-key");
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);

        let mut keys = HashMap::new();
        keys.insert(1, VaultKey(key));
        Self {
            keys,
            active_version: 1,
        }
    }

    /// Version used for new encryption.
    pub fn active_version(&self) -> u32 {
        self.active_version
    }

    /// Key for the active version.
    pub fn active_key(&self) -> &[u8; KEY_LEN] {
        // Invariant: parse() and dev() guarantee the active version exists
        &self.keys[&self.active_version].0
    }

    /// Key for a recorded version, if it is still in the ring.
    pub fn key(&self, version: u32) -> Option<&[u8; KEY_LEN]> {
        self.keys.get(&version).map(|k| &k.0)
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never render key material
        let mut versions: Vec<_> = self.keys.keys().collect();
        versions.sort();
        f.debug_struct("Keyring")
            .field("versions", &versions)
            .field("active_version", &self.active_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64_key(seed: u8) -> String {
        BASE64.encode([seed; KEY_LEN])
    }

    #[test]
    fn parses_multiple_versions() {
        let spec = format!("1:{},2:{}", b64_key(1), b64_key(2));
        let ring = Keyring::parse(&spec, 2).unwrap();

        assert_eq!(ring.active_version(), 2);
        assert!(ring.key(1).is_some());
        assert!(ring.key(2).is_some());
        assert!(ring.key(3).is_none());
    }

    #[test]
    fn active_version_must_exist() {
        let spec = format!("1:{}", b64_key(1));
        let err = Keyring::parse(&spec, 9).unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(matches!(
            Keyring::parse("not-an-entry", 1).unwrap_err(),
            CadenceError::Config(_)
        ));
        assert!(matches!(
            Keyring::parse("1:%%%", 1).unwrap_err(),
            CadenceError::Config(_)
        ));
        assert!(matches!(
            Keyring::parse("1:c2hvcnQ=", 1).unwrap_err(),
            CadenceError::Config(_)
        ));
        assert!(matches!(
            Keyring::parse("", 1).unwrap_err(),
            CadenceError::Config(_)
        ));
    }

    #[test]
    fn rejects_duplicate_versions() {
        let spec = format!("1:{},1:{}", b64_key(1), b64_key(2));
        assert!(matches!(
            Keyring::parse(&spec, 1).unwrap_err(),
            CadenceError::Config(_)
        ));
    }

    #[test]
    fn debug_does_not_leak_key_material() {
        let spec = format!("1:{}", b64_key(7));
        let ring = Keyring::parse(&spec, 1).unwrap();
        let rendered = format!("{ring:?}");
        assert!(!rendered.contains(&b64_key(7)));
    }
}
