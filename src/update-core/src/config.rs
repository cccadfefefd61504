//! Configuration for the updater.

use std::time::Duration;

/// The four update channels. All have DNSSEC enabled and valid.
pub const DEFAULT_DNS_HOSTS: [&str; 4] = [
    "updates.moneropulse.org",
    "updates.moneropulse.net",
    "updates.moneropulse.co",
    "updates.moneropulse.se",
];

/// Minimum count of distinct, known-signer, hash-matching attestations.
pub const MIN_GITIAN_SIGS: u32 = 2;

/// Configuration for one updater instance.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Software identity queried in DNS records.
    pub software: String,
    /// Local platform build tag.
    pub build_tag: String,
    /// Version currently installed; empty when unknown.
    pub current_version: String,
    /// DNSSEC-enabled TXT endpoints, queried in parallel.
    pub dns_hosts: Vec<String>,
    /// Gitian signature threshold.
    pub min_gitian_sigs: u32,
    /// Base URL release artifacts are downloaded from.
    pub download_base: String,
    /// Hosting site serving the Gitian tree index pages.
    pub vcs_host: String,
    /// Hosting site serving raw Gitian assertion documents.
    pub raw_host: String,
    /// Project path under both hosting sites.
    pub project: String,
    /// Per-operation network timeout.
    pub timeout: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            software: "monero".into(),
            build_tag: default_build_tag().into(),
            current_version: String::new(),
            dns_hosts: DEFAULT_DNS_HOSTS.iter().map(|s| (*s).to_string()).collect(),
            min_gitian_sigs: MIN_GITIAN_SIGS,
            download_base: "https://downloads.getmonero.org".into(),
            vcs_host: "https://github.com".into(),
            raw_host: "https://raw.githubusercontent.com".into(),
            project: "monero-project".into(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Build tag for the host platform, `"source"` when no binary build exists.
#[must_use]
pub fn default_build_tag() -> &'static str {
    if cfg!(all(target_os = "windows", target_pointer_width = "64")) {
        "win-x64"
    } else if cfg!(target_os = "windows") {
        "win-x86"
    } else if cfg!(target_os = "freebsd") {
        "freebsd"
    } else if cfg!(target_os = "macos") {
        "mac-x64"
    } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
        "linux-armv8"
    } else if cfg!(all(target_os = "linux", target_arch = "arm")) {
        "linux-armv7"
    } else if cfg!(all(target_os = "linux", target_arch = "x86")) {
        "linux-x86"
    } else if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        "linux-x64"
    } else {
        "source"
    }
}
