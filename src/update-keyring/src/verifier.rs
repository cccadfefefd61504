//! The OpenPGP verifier seam.
//!
//! The update core only ever talks to an OpenPGP engine through the
//! [`PgpVerifier`] trait. The production implementation is
//! [`EphemeralKeyring`](crate::EphemeralKeyring); tests substitute scripted
//! doubles.

use crate::error::KeyringError;

/// Outcome of checking one detached signature.
///
/// Mirrors the three-way answer an OpenPGP engine gives: the signature is
/// cryptographically good, provably bad, or cannot be checked at all (for
/// example because the signing key is absent from the keyring).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigStatus {
    /// The signature verified against a trusted key.
    Good,
    /// The signature is attributable to a known key but does not verify.
    Bad,
    /// The signature could not be checked.
    Indeterminate,
}

/// Result of a detached-signature verification.
#[derive(Debug, Clone)]
pub struct SignatureCheck {
    /// Three-way verification outcome.
    pub status: SigStatus,
    /// Uppercase hex fingerprint of the signer, when one could be
    /// established. For [`SigStatus::Indeterminate`] this may be a bare
    /// key ID or absent entirely.
    pub fingerprint: Option<String>,
}

/// An ephemeral OpenPGP engine: import trusted keys, then verify detached
/// signatures against them.
///
/// Implementations are expected to be self-contained per run; nothing
/// persists between invocations. Any key material written to disk must live
/// under an owner-only directory that [`PgpVerifier::close`] removes.
pub trait PgpVerifier: Send {
    /// Import one armored public key and return its primary fingerprint
    /// (uppercase hex).
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed or stored. Callers treat
    /// any import error as fatal for the whole import run.
    fn import_key(&mut self, armored: &str) -> Result<String, KeyringError>;

    /// Mark an imported key as trusted (accept-on-first-use).
    ///
    /// Only keys marked good participate in verification.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::KeyNotFound`] if no imported key matches.
    fn set_policy_good(&mut self, fingerprint: &str) -> Result<(), KeyringError>;

    /// Verify a detached signature over `data`.
    ///
    /// Never errors: every failure mode is folded into the returned
    /// [`SignatureCheck`].
    fn verify_detached(&self, data: &[u8], signature: &[u8]) -> SignatureCheck;

    /// Remove the keyring home directory and forget all imported keys.
    ///
    /// Idempotent; also performed on drop.
    fn close(&mut self);
}
