//! # monero-update-core
//!
//! Secure update verification for Monero software distribution.
//!
//! Given the local software identity and platform build tag, the core
//! discovers the latest published version over a cross-validated DNSSEC
//! channel, corroborates the release through a threshold of independent
//! reproducible-build (Gitian) attestations, downloads the artifact, and
//! checks its SHA-256 against the DNS-advertised hash.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Updater                              │
//! │                                                              │
//! │  select ─▶ QueryDNS ─▶ CheckVersion ─▶ ImportPubkeys         │
//! │                                             │                │
//! │              VerifyGitianSignatures ◀── FetchGitianSigs      │
//! │                       │                                      │
//! │                       ▼                                      │
//! │                   Download ─▶ CheckHash ─▶ ValidUpdate       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each arrow is gated on the predecessor's success; failures divert to
//! typed terminal states. Engines publish their progress on the
//! [`NotificationBus`](bus::NotificationBus); the UI collaborator sends
//! commands back over a one-way queue.
//!
//! ## Security Properties
//!
//! - **Cross-validated discovery**: two independent DNSSEC-validated
//!   endpoints must agree on the record set.
//! - **Threshold attestation**: at least two distinct, known release
//!   engineers must have reproduced the exact artifact hash.
//! - **Red signature fatal**: one provably bad signature fails the run,
//!   however many good ones surround it.
//! - **Fail-closed key import**: verification never runs against a partial
//!   key set.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod dns;
pub mod download;
pub mod error;
pub mod gitian;
pub mod hash;
pub mod keys;
pub mod types;
pub mod updater;
pub mod urls;
pub mod version;

pub use bus::{NotificationBus, UpdateEvent};
pub use config::{default_build_tag, UpdaterConfig, MIN_GITIAN_SIGS};
pub use dns::{compute_consensus, DnsConsensus, DnssecTxtResolver, TxtResolver};
pub use download::{Fetcher, HttpFetcher};
pub use error::UpdateError;
pub use gitian::{SignerTally, VerificationCounters};
pub use types::{DnsQueryResult, State, Tristate, UpdateRecord};
pub use updater::Updater;
