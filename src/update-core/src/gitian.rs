//! Gitian attestation retrieval and threshold verification.
//!
//! Independent reproducible-build signers publish, per release and
//! platform, an `assert` document naming the artifacts they built and the
//! hashes they obtained, plus a detached OpenPGP signature over it. The
//! verifier discovers signer directories on the hosting site, checks each
//! signature against the ephemeral keyring, and counts distinct known
//! fingerprints whose assertion pins the expected artifact hash.
//!
//! Two rules carry the security argument: distinct fingerprints prevent one
//! signer from stuffing the count, and a single provably bad signature
//! fails the run no matter how many good ones surround it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use monero_update_keyring::{PgpVerifier, SigStatus};
use tracing::{debug, info, instrument, warn};

use crate::bus::{NotificationBus, UpdateEvent};
use crate::download::Fetcher;
use crate::urls;

/// Longest accepted signer directory name.
const MAX_SIGNER_NAME_LEN: usize = 20;

/// Shared verification counters, readable by the UI mid-run.
///
/// Within one run, `processed` and `valid` only ever grow, `valid` never
/// exceeds `processed`, and `bad_found`, once set, stays set.
#[derive(Default)]
pub struct VerificationCounters {
    processed: AtomicU32,
    total: AtomicU32,
    valid: AtomicU32,
    min_required: AtomicU32,
    bad_found: AtomicBool,
}

impl VerificationCounters {
    /// Candidates processed so far.
    #[must_use]
    pub fn processed(&self) -> u32 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Candidates discovered.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    /// Distinct known-signer, hash-matching signatures.
    #[must_use]
    pub fn valid(&self) -> u32 {
        self.valid.load(Ordering::SeqCst)
    }

    /// Threshold in force.
    #[must_use]
    pub fn min_required(&self) -> u32 {
        self.min_required.load(Ordering::SeqCst)
    }

    /// Whether a provably bad signature was seen.
    #[must_use]
    pub fn bad_found(&self) -> bool {
        self.bad_found.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total(&self, n: u32, bus: &NotificationBus) {
        self.total.store(n, Ordering::SeqCst);
        bus.publish(UpdateEvent::TotalGitianSigsChanged { count: n });
    }

    pub(crate) fn set_processed(&self, n: u32, bus: &NotificationBus) {
        self.processed.store(n, Ordering::SeqCst);
        bus.publish(UpdateEvent::ProcessedGitianSigsChanged { count: n });
    }

    pub(crate) fn set_valid(&self, n: u32, bus: &NotificationBus) {
        self.valid.store(n, Ordering::SeqCst);
        bus.publish(UpdateEvent::ValidGitianSigsChanged { count: n });
    }

    pub(crate) fn set_min_required(&self, n: u32, bus: &NotificationBus) {
        self.min_required.store(n, Ordering::SeqCst);
        bus.publish(UpdateEvent::MinValidGitianSigsChanged { count: n });
    }

    pub(crate) fn inc_processed(&self, bus: &NotificationBus) {
        let n = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        bus.publish(UpdateEvent::ProcessedGitianSigsChanged { count: n });
    }

    pub(crate) fn inc_valid(&self, bus: &NotificationBus) {
        let n = self.valid.fetch_add(1, Ordering::SeqCst) + 1;
        bus.publish(UpdateEvent::ValidGitianSigsChanged { count: n });
    }

    pub(crate) fn set_bad_found(&self) {
        self.bad_found.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self, bus: &NotificationBus) {
        self.set_total(0, bus);
        self.set_processed(0, bus);
        self.set_valid(0, bus);
        self.bad_found.store(false, Ordering::SeqCst);
    }
}

/// Everything one verification pass needs to know about the release.
#[derive(Debug, Clone)]
pub struct GitianJob {
    /// Software identity, e.g. `monero`.
    pub software: String,
    /// Coarse platform token used in remote paths, e.g. `linux`.
    pub platform: String,
    /// Full release version.
    pub version: String,
    /// Artifact filename the assertions must pin, derived from the
    /// Gitian-tagged update URL.
    pub filename: String,
    /// Hash the assertions must agree with.
    pub expected_hash: String,
    /// Base URL for raw assertion documents.
    pub blob_base: String,
}

/// Result of one verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerTally {
    /// Distinct known-fingerprint, hash-matching signatures.
    pub valid: u32,
    /// Whether any signature was provably bad.
    pub bad_found: bool,
}

impl SignerTally {
    /// The pass succeeds only with enough valid signatures and no bad one.
    #[must_use]
    pub fn accepted(&self, min_required: u32) -> bool {
        self.valid >= min_required && !self.bad_found
    }
}

/// Extract the hex hash from an assertion line of the form
/// `<hex>␣␣<filename>`.
fn assertion_hash_for(line: &str, filename: &str) -> Option<String> {
    let hash = line.strip_suffix(filename)?.strip_suffix("  ")?;
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_string())
}

/// A signer directory name is a short path segment of word characters.
fn acceptable_signer_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SIGNER_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Scan a tree index page for signer directories under `tree_path`.
fn scan_signer_anchors(body: &str, tree_path: &str) -> Vec<String> {
    let link_prefix = format!("href=\"{}", tree_path);
    let mut users = Vec::new();
    let mut idx = 0;

    while let Some(found) = body[idx..].find(&link_prefix) {
        let start = idx + found + link_prefix.len();
        let Some(quote) = body[start..].find('"') else {
            break;
        };
        let candidate = &body[start..start + quote];
        idx = start + quote;

        let Some(user) = candidate.strip_prefix('/') else {
            continue;
        };
        if acceptable_signer_name(user) {
            users.push(user.to_string());
        }
    }
    users
}

/// Discover signer candidates for one release/platform.
///
/// Returns `None` when the index page cannot be fetched at all, otherwise
/// the acceptable candidates in page order (possibly empty).
#[instrument(skip(fetcher, bus), fields(version = %job_version, platform = %platform))]
pub async fn discover_signers(
    fetcher: &Arc<dyn Fetcher>,
    vcs_host: &str,
    project: &str,
    job_version: &str,
    platform: &str,
    bus: &NotificationBus,
) -> Option<Vec<String>> {
    let tree_path = urls::gitian_tree_path(project, job_version, platform);
    let tree_url = format!("{}{}", vcs_host, tree_path);
    bus.message(format!("Fetching Gitian signatures from {}", tree_url));

    let body = match fetcher.fetch(&tree_url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "signer tree index fetch failed");
            bus.message("Gitian signatures not found");
            return None;
        }
    };

    let users = scan_signer_anchors(&String::from_utf8_lossy(&body), &tree_path);
    info!(candidates = users.len(), "signer discovery complete");
    Some(users)
}

/// Verify every discovered signer in order and tally the result.
///
/// Each candidate contributes at most one `valid` count: the signature must
/// verify, come from an imported fingerprint not yet counted, and its
/// assertion must pin `expected_hash` for the job's filename. Every
/// candidate increments `processed` exactly once, whatever its fate.
#[instrument(skip_all, fields(signers = users.len()))]
pub async fn verify_signers(
    fetcher: &Arc<dyn Fetcher>,
    verifier: &std::sync::Mutex<Box<dyn PgpVerifier>>,
    imported_fingerprints: &BTreeMap<String, String>,
    users: &[String],
    job: &GitianJob,
    counters: &VerificationCounters,
    bus: &NotificationBus,
) -> SignerTally {
    let mut counted: BTreeMap<String, String> = BTreeMap::new();

    for user in users {
        let assert_url =
            urls::gitian_assert_url(&job.blob_base, user, &job.software, &job.platform, &job.version);
        let sig_url = format!("{}.sig", assert_url);

        match fetcher.fetch(&assert_url).await {
            Ok(assert_body) => match fetcher.fetch(&sig_url).await {
                Ok(sig_body) => {
                    classify_signer(
                        user,
                        &assert_body,
                        &sig_body,
                        verifier,
                        imported_fingerprints,
                        &mut counted,
                        job,
                        counters,
                        bus,
                    );
                }
                Err(_) => bus.message(format!("Failed to fetch {}", sig_url)),
            },
            Err(_) => bus.message(format!("Failed to fetch {}", assert_url)),
        }
        counters.inc_processed(bus);
    }

    SignerTally {
        valid: counters.valid(),
        bad_found: counters.bad_found(),
    }
}

/// Classify one signer's assertion and signature, updating counters.
#[allow(clippy::too_many_arguments)]
fn classify_signer(
    user: &str,
    assert_body: &[u8],
    sig_body: &[u8],
    verifier: &std::sync::Mutex<Box<dyn PgpVerifier>>,
    imported_fingerprints: &BTreeMap<String, String>,
    counted: &mut BTreeMap<String, String>,
    job: &GitianJob,
    counters: &VerificationCounters,
    bus: &NotificationBus,
) {
    let check = verifier
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .verify_detached(assert_body, sig_body);
    let fingerprint = check.fingerprint.unwrap_or_default();

    match check.status {
        SigStatus::Good if counted.contains_key(&fingerprint) => {
            let previous = &counted[&fingerprint];
            bus.message(format!(
                "Duplicate Gitian signature from {}, previously seen from {}, fingerprint {}",
                user, previous, fingerprint
            ));
        }
        SigStatus::Good if !imported_fingerprints.contains_key(&fingerprint) => {
            bus.message(format!(
                "Valid Gitian signature from {}, but from key {} which is not the one on record",
                user, fingerprint
            ));
        }
        SigStatus::Good => {
            let text = String::from_utf8_lossy(assert_body);
            let mut assertion_hash = None;
            for line in text.lines() {
                if let Some(hash) = assertion_hash_for(line, &job.filename) {
                    assertion_hash = Some(hash);
                }
            }
            match assertion_hash {
                None => {
                    bus.message(format!(
                        "No hash found in Gitian assert file for {} from {}",
                        job.filename, user
                    ));
                }
                Some(hash) if !hash.eq_ignore_ascii_case(&job.expected_hash) => {
                    debug!(claimed = %hash, expected = %job.expected_hash, "assertion hash mismatch");
                    bus.message(format!(
                        "Gitian hash does not match expected hash for {} from {}",
                        job.filename, user
                    ));
                }
                Some(_) => {
                    bus.message(format!(
                        "Good Gitian signature with matching hash from {}, fingerprint {}",
                        user, fingerprint
                    ));
                    counters.inc_valid(bus);
                    counted.insert(fingerprint, user.to_string());
                }
            }
        }
        SigStatus::Bad => {
            bus.message(format!("Bad Gitian signature from {}", user));
            counters.set_bad_found();
        }
        SigStatus::Indeterminate => {
            bus.message(format!(
                "Inconclusive Gitian signature from {}, fingerprint {}",
                user, fingerprint
            ));
        }
    }
}
