//! Error types for keyring operations.

use thiserror::Error;

/// Errors that can occur during keyring operations.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// The keyring home directory could not be created or secured.
    #[error("Keyring initialization failed: {reason}")]
    InitFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// An armored public key could not be parsed or stored.
    #[error("Key import failed: {reason}")]
    ImportFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// No imported key matches the given fingerprint.
    #[error("Key not found: {fingerprint}")]
    KeyNotFound {
        /// The fingerprint that was looked up.
        fingerprint: String,
    },

    /// Filesystem error while handling key material.
    #[error("Keyring I/O error: {0}")]
    Io(#[from] std::io::Error),
}
