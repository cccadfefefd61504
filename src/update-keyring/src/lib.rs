//! # monero-update-keyring
//!
//! Ephemeral OpenPGP keyring for release-signature verification.
//!
//! The crate exposes a single seam, [`PgpVerifier`], that the update core
//! programs against: import armored public keys, accept them on first use,
//! and verify detached signatures. The production backend,
//! [`EphemeralKeyring`], parses keys and signatures with rPGP and keeps all
//! key material under an owner-only scratch directory that is removed when
//! verification finishes.
//!
//! ## Security Properties
//!
//! - **Ephemeral**: nothing persists between runs; the keyring home is
//!   deleted on close and on drop.
//! - **Fail-closed import**: callers abort the whole import on the first
//!   error, so verification never runs against a partial key set.
//! - **Explicit trust**: only keys explicitly marked good participate in
//!   verification.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod error;
mod keyring;
mod verifier;

pub use error::KeyringError;
pub use keyring::EphemeralKeyring;
pub use verifier::{PgpVerifier, SigStatus, SignatureCheck};
