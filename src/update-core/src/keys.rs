//! Compiled-in release-signer public keys and the import step.
//!
//! The key set ships with the binary and is immutable at runtime. Import is
//! fail-closed: the first key that cannot be imported or trusted aborts the
//! whole run, because threshold verification against a partial key set
//! would silently weaken the scheme.

use std::collections::BTreeMap;

use monero_update_keyring::PgpVerifier;
use tracing::{info, instrument};

use crate::bus::NotificationBus;
use crate::error::UpdateError;

/// One compiled-in (identity, armored key) pair.
#[derive(Debug, Clone, Copy)]
pub struct PublicKeyEntry {
    /// Release-engineer identity the key belongs to.
    pub identity: &'static str,
    /// ASCII-armored OpenPGP public key.
    pub armored_key: &'static str,
}

/// The release-engineer key set shipped with this build.
pub const RELEASE_SIGNER_KEYS: &[PublicKeyEntry] = &[
    PublicKeyEntry {
        identity: "binaryfate",
        armored_key: include_str!("../keys/binaryfate.asc"),
    },
    PublicKeyEntry {
        identity: "luigi1111",
        armored_key: include_str!("../keys/luigi1111.asc"),
    },
    PublicKeyEntry {
        identity: "selsta",
        armored_key: include_str!("../keys/selsta.asc"),
    },
];

/// Import `keys` into the verifier, mark each good, and record which
/// fingerprint each identity resolved to.
///
/// # Errors
///
/// Returns the first import or trust error; by then some keys may already
/// sit in the ephemeral keyring, which the caller discards wholesale.
#[instrument(skip_all)]
pub fn import_keys(
    verifier: &mut dyn PgpVerifier,
    keys: &[PublicKeyEntry],
    bus: &NotificationBus,
) -> Result<BTreeMap<String, String>, UpdateError> {
    let mut imported = BTreeMap::new();
    for entry in keys {
        let fingerprint = verifier.import_key(entry.armored_key)?;
        verifier.set_policy_good(&fingerprint)?;
        bus.message(format!("Imported key {} from {}", fingerprint, entry.identity));
        imported.insert(fingerprint, entry.identity.to_string());
    }
    info!(count = imported.len(), "public key import complete");
    Ok(imported)
}
