//! rPGP-backed ephemeral keyring.
//!
//! Keys are imported from armored text into memory and mirrored as `.asc`
//! files under an owner-only home directory. The directory is created when
//! the first key arrives and secured before any key material is written;
//! it and every imported key disappear when the keyring is closed or
//! dropped. Nothing survives the run.

use std::fs;
use std::io::Cursor;

use pgp::composed::{Deserializable, SignedPublicKey, StandaloneSignature};
use pgp::types::KeyTrait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::KeyringError;
use crate::verifier::{PgpVerifier, SigStatus, SignatureCheck};

/// One imported key with its trust mark.
struct KeyEntry {
    /// Uppercase hex fingerprint of the primary key.
    fingerprint: String,
    /// The parsed key, primary plus subkeys.
    key: SignedPublicKey,
    /// Whether the key has been accepted for verification.
    policy_good: bool,
}

/// In-memory OpenPGP keyring rooted at a private scratch directory.
#[derive(Default)]
pub struct EphemeralKeyring {
    home: Option<TempDir>,
    keys: Vec<KeyEntry>,
}

impl EphemeralKeyring {
    /// Create an empty keyring. The home directory appears on first import.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of imported keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The home directory, created and secured on first use.
    fn home(&mut self) -> Result<&TempDir, KeyringError> {
        if self.home.is_none() {
            let home = tempfile::Builder::new()
                .prefix("monero-update-keys-")
                .tempdir()
                .map_err(|e| KeyringError::InitFailed {
                    reason: format!("cannot create keyring home: {}", e),
                })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(home.path(), fs::Permissions::from_mode(0o700)).map_err(
                    |e| KeyringError::InitFailed {
                        reason: format!("cannot restrict keyring home permissions: {}", e),
                    },
                )?;
            }

            info!(home = %home.path().display(), "created ephemeral keyring home");
            self.home = Some(home);
        }
        self.home.as_ref().ok_or_else(|| KeyringError::InitFailed {
            reason: "keyring home unavailable".into(),
        })
    }

    /// Find the trusted key entry whose primary key or subkey made `sig`,
    /// going by the signature's issuer key ID.
    fn issuer_entry(&self, sig: &StandaloneSignature) -> Option<&KeyEntry> {
        let issuer = sig.signature.issuer()?;
        self.keys.iter().filter(|e| e.policy_good).find(|entry| {
            entry.key.key_id() == *issuer
                || entry
                    .key
                    .public_subkeys
                    .iter()
                    .any(|sub| sub.key_id() == *issuer)
        })
    }

    /// Try to verify `sig` over `data` with one key entry, primary first,
    /// then each subkey.
    fn verify_with_entry(entry: &KeyEntry, sig: &StandaloneSignature, data: &[u8]) -> bool {
        if sig.verify(&entry.key, data).is_ok() {
            return true;
        }
        entry
            .key
            .public_subkeys
            .iter()
            .any(|sub| sig.verify(sub, data).is_ok())
    }

    /// Parse a detached signature, armored or binary.
    fn parse_signature(signature: &[u8]) -> Option<StandaloneSignature> {
        if signature.starts_with(b"-----BEGIN") {
            let text = std::str::from_utf8(signature).ok()?;
            StandaloneSignature::from_string(text).ok().map(|(sig, _)| sig)
        } else {
            StandaloneSignature::from_bytes(Cursor::new(signature)).ok()
        }
    }
}

impl PgpVerifier for EphemeralKeyring {
    fn import_key(&mut self, armored: &str) -> Result<String, KeyringError> {
        // Secure the home before any key material touches disk.
        let home_path = self.home()?.path().to_path_buf();

        let (key, _headers) =
            SignedPublicKey::from_string(armored).map_err(|e| KeyringError::ImportFailed {
                reason: format!("cannot parse armored key: {}", e),
            })?;
        key.verify().map_err(|e| KeyringError::ImportFailed {
            reason: format!("key self-signature check failed: {}", e),
        })?;

        let fingerprint = hex::encode_upper(key.fingerprint());
        fs::write(home_path.join(format!("{}.asc", fingerprint)), armored)?;

        debug!(fingerprint = %fingerprint, "imported public key");
        self.keys.push(KeyEntry {
            fingerprint: fingerprint.clone(),
            key,
            policy_good: false,
        });
        Ok(fingerprint)
    }

    fn set_policy_good(&mut self, fingerprint: &str) -> Result<(), KeyringError> {
        let entry = self
            .keys
            .iter_mut()
            .find(|e| e.fingerprint == fingerprint)
            .ok_or_else(|| KeyringError::KeyNotFound {
                fingerprint: fingerprint.to_string(),
            })?;
        entry.policy_good = true;
        Ok(())
    }

    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> SignatureCheck {
        let Some(sig) = Self::parse_signature(signature) else {
            warn!("detached signature did not parse");
            return SignatureCheck {
                status: SigStatus::Indeterminate,
                fingerprint: None,
            };
        };

        for entry in self.keys.iter().filter(|e| e.policy_good) {
            if Self::verify_with_entry(entry, &sig, data) {
                return SignatureCheck {
                    status: SigStatus::Good,
                    fingerprint: Some(entry.fingerprint.clone()),
                };
            }
        }

        // No trusted key verified the signature. If the issuer is one of our
        // keys, the signature is attributable and provably bad; otherwise we
        // simply cannot check it.
        if let Some(entry) = self.issuer_entry(&sig) {
            return SignatureCheck {
                status: SigStatus::Bad,
                fingerprint: Some(entry.fingerprint.clone()),
            };
        }

        let issuer_id = sig
            .signature
            .issuer()
            .map(|id| hex::encode_upper(id.as_ref()));
        SignatureCheck {
            status: SigStatus::Indeterminate,
            fingerprint: issuer_id,
        }
    }

    fn close(&mut self) {
        self.keys.clear();
        if let Some(home) = self.home.take() {
            let path = home.path().to_path_buf();
            if let Err(e) = home.close() {
                warn!(path = %path.display(), error = %e, "failed to remove keyring home");
            } else {
                debug!(path = %path.display(), "removed keyring home");
            }
        }
    }
}

impl Drop for EphemeralKeyring {
    fn drop(&mut self) {
        self.close();
    }
}
