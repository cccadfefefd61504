//! Error types for update-verification operations.
//!
//! Engines translate these into state transitions at the state-machine
//! boundary; they never unwind across it.

use thiserror::Error;

/// Errors that can occur while driving an update check.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// HTTP transfer error.
    #[error("HTTP error: {message}")]
    Http {
        /// Error message.
        message: String,
    },

    /// Filesystem error on a staged artifact or scratch path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Keyring error.
    #[error("Keyring error: {0}")]
    Keyring(#[from] monero_update_keyring::KeyringError),
}
