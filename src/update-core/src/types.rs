//! Core data types for the update verifier.
//!
//! The update lifecycle is a sum type, [`State`], whose variants carry their
//! outcome and display string as associated constants. Checks that are
//! reportable while in flight use [`Tristate`].

use serde::Serialize;

/// The reportable state of an in-progress binary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    /// The check has not resolved yet.
    #[default]
    Unknown,
    /// The check resolved positively.
    True,
    /// The check resolved negatively.
    False,
}

impl Tristate {
    /// Encode for storage in an atomic cell.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Tristate::Unknown => 0,
            Tristate::True => 1,
            Tristate::False => 2,
        }
    }

    /// Decode from an atomic cell. Unrecognized values map to `Unknown`.
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Tristate::True,
            2 => Tristate::False,
            _ => Tristate::Unknown,
        }
    }
}

/// Lifecycle nodes of one update-verification run.
///
/// Every state carries a constant (outcome, display string) pair. States
/// whose outcome is not [`Tristate::Unknown`] are terminal, with one
/// exception to the forward-only rule: `Download` and `CheckHash` may be
/// re-entered when the operator retries after `DownloadFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing has happened yet.
    None,
    /// Gates are being reset; the variant chooser is showing.
    Init,
    /// The DNS consensus resolver is running.
    QueryDns,
    /// Fewer than two validated, agreeing DNS endpoints.
    DnsFailed,
    /// The version record parser is running.
    CheckVersion,
    /// The advertised version equals the local one.
    UpToDate,
    /// Only versions older than the local one were advertised.
    BackInTime,
    /// No usable update record survived parsing.
    NoUpdateInfoFound,
    /// The artifact download is running.
    Download,
    /// The download failed; the operator may retry.
    DownloadFailed,
    /// The downloaded file is being hashed.
    CheckHash,
    /// The file hash does not match the DNS-advertised hash.
    BadHash,
    /// Release-signer public keys are being imported.
    ImportPubkeys,
    /// A compiled-in key failed to import.
    PubkeyImportFailed,
    /// Signer directories are being discovered on the hosting site.
    FetchGitianSigs,
    /// Per-signer assertions are being fetched and verified.
    VerifyGitianSignatures,
    /// Discovery returned zero signer candidates.
    NoGitianSigs,
    /// Fewer matching signatures than the required threshold.
    NotEnoughGitianSigs,
    /// At least one signature was provably invalid.
    BadGitianSigs,
    /// The artifact passed every check and is staged locally.
    ValidUpdate,
}

impl State {
    /// Constant outcome of this state.
    #[must_use]
    pub const fn outcome(self) -> Tristate {
        match self {
            State::None
            | State::Init
            | State::QueryDns
            | State::CheckVersion
            | State::Download
            | State::CheckHash
            | State::ImportPubkeys
            | State::FetchGitianSigs
            | State::VerifyGitianSignatures => Tristate::Unknown,
            State::UpToDate | State::BackInTime | State::ValidUpdate => Tristate::True,
            State::DnsFailed
            | State::NoUpdateInfoFound
            | State::DownloadFailed
            | State::BadHash
            | State::PubkeyImportFailed
            | State::NoGitianSigs
            | State::NotEnoughGitianSigs
            | State::BadGitianSigs => Tristate::False,
        }
    }

    /// Constant display string of this state.
    #[must_use]
    pub const fn display(self) -> &'static str {
        match self {
            State::None => "None",
            State::Init => "Initializing",
            State::QueryDns => "Querying DNS",
            State::DnsFailed => "DNS check failed",
            State::CheckVersion => "Checking version",
            State::UpToDate => "We are up to date",
            State::BackInTime => "Only old versions found",
            State::NoUpdateInfoFound => "No update information found",
            State::Download => "Downloading update",
            State::DownloadFailed => "Download failed",
            State::CheckHash => "Checking hash",
            State::BadHash => "Invalid hash",
            State::ImportPubkeys => "Importing public keys",
            State::PubkeyImportFailed => "Failed to import public keys",
            State::FetchGitianSigs => "Fetching Gitian signatures",
            State::VerifyGitianSignatures => "Verifying Gitian signatures",
            State::NoGitianSigs => "No Gitian signatures found",
            State::NotEnoughGitianSigs => "Not enough matching Gitian signatures found",
            State::BadGitianSigs => "At least one Gitian signature was invalid",
            State::ValidUpdate => "Valid update downloaded and verified",
        }
    }

    /// Whether this state ends the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.outcome() != Tristate::Unknown
    }
}

/// What one DNS endpoint answered.
#[derive(Debug, Clone, Default)]
pub struct DnsQueryResult {
    /// TXT record strings, in answer order.
    pub records: Vec<String>,
    /// Whether the zone presented DNSSEC material.
    pub dnssec_available: bool,
    /// Whether DNSSEC validation succeeded.
    pub dnssec_valid: bool,
}

impl DnsQueryResult {
    /// An endpoint counts toward quorum when it validated and returned
    /// at least one record.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.dnssec_available && self.dnssec_valid && !self.records.is_empty()
    }
}

/// The parsed form of one update TXT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Software identity, e.g. `monero` or `monero-gui`.
    pub software: String,
    /// Target platform build tag, e.g. `linux-x64`.
    pub build_tag: String,
    /// Advertised version string.
    pub version: String,
    /// Hex SHA-256 of the release artifact.
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_resolved_outcomes() {
        let all = [
            State::None,
            State::Init,
            State::QueryDns,
            State::DnsFailed,
            State::CheckVersion,
            State::UpToDate,
            State::BackInTime,
            State::NoUpdateInfoFound,
            State::Download,
            State::DownloadFailed,
            State::CheckHash,
            State::BadHash,
            State::ImportPubkeys,
            State::PubkeyImportFailed,
            State::FetchGitianSigs,
            State::VerifyGitianSignatures,
            State::NoGitianSigs,
            State::NotEnoughGitianSigs,
            State::BadGitianSigs,
            State::ValidUpdate,
        ];
        for state in all {
            assert_eq!(state.is_terminal(), state.outcome() != Tristate::Unknown);
            assert!(!state.display().is_empty());
        }
    }

    #[test]
    fn test_success_and_failure_terminals() {
        assert_eq!(State::ValidUpdate.outcome(), Tristate::True);
        assert_eq!(State::UpToDate.outcome(), Tristate::True);
        assert_eq!(State::BackInTime.outcome(), Tristate::True);
        assert_eq!(State::BadGitianSigs.outcome(), Tristate::False);
        assert_eq!(State::DownloadFailed.outcome(), Tristate::False);
        assert_eq!(State::QueryDns.outcome(), Tristate::Unknown);
    }

    #[test]
    fn test_tristate_atomic_round_trip() {
        for t in [Tristate::Unknown, Tristate::True, Tristate::False] {
            assert_eq!(Tristate::from_u8(t.as_u8()), t);
        }
        assert_eq!(Tristate::from_u8(77), Tristate::Unknown);
    }

    #[test]
    fn test_usable_endpoint_needs_all_three() {
        let mut r = DnsQueryResult {
            records: vec!["a".into()],
            dnssec_available: true,
            dnssec_valid: true,
        };
        assert!(r.is_usable());
        r.records.clear();
        assert!(!r.is_usable());
        r.records.push("a".into());
        r.dnssec_valid = false;
        assert!(!r.is_usable());
    }
}
