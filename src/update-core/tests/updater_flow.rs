//! End-to-end runs of the updater state machine against scripted
//! collaborators: a canned TXT resolver, an in-memory document server, and
//! a table-driven OpenPGP verifier.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use monero_update_core::{
    DnsQueryResult, Fetcher, State, Tristate, UpdateError, UpdateEvent, Updater, UpdaterConfig,
};
use monero_update_keyring::{KeyringError, PgpVerifier, SigStatus, SignatureCheck};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedReceiver;

const VERSION: &str = "0.18.3.1";
const ARTIFACT: &[u8] = b"monero release artifact bytes";
const GITIAN_FILENAME: &str = "monero-x86_64-linux-gnu-v0.18.3.1.tar.bz2";
const TREE_PATH: &str = "/monero-project/gitian.sigs/tree/master/v0.18.3.1-linux";
const TREE_URL: &str = "https://github.com/monero-project/gitian.sigs/tree/master/v0.18.3.1-linux";
const BLOB_BASE: &str =
    "https://raw.githubusercontent.com/monero-project/gitian.sigs/master/v0.18.3.1-linux";
const DOWNLOAD_URL: &str = "https://downloads.getmonero.org/cli/monero-linux-x64-v0.18.3.1.tar.bz2";

fn artifact_hash() -> String {
    hex::encode(Sha256::digest(ARTIFACT))
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct CannedResolver {
    answers: HashMap<String, DnsQueryResult>,
}

#[async_trait]
impl monero_update_core::TxtResolver for CannedResolver {
    async fn query_txt(&self, hostname: &str) -> DnsQueryResult {
        self.answers.get(hostname).cloned().unwrap_or_default()
    }
}

/// Serves documents from a shared map so tests can add bodies mid-run.
#[derive(Clone, Default)]
struct DocServer {
    docs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl DocServer {
    fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.docs.lock().unwrap().insert(url.to_string(), body.into());
    }
}

#[async_trait]
impl Fetcher for DocServer {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        self.docs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpdateError::Http {
                message: format!("404: {}", url),
            })
    }

    async fn download(
        &self,
        url: &str,
        path: &Path,
        progress: monero_update_core::download::ProgressFn,
    ) -> Result<(), UpdateError> {
        let body = self.fetch(url).await?;
        progress(0, body.len() as i64);
        std::fs::write(path, &body)?;
        progress(body.len() as u64, body.len() as i64);
        Ok(())
    }
}

/// Table-driven verifier: signatures map to scripted checks; imports hand
/// out sequential fingerprints KEY00, KEY01, ...
struct TableVerifier {
    imported: usize,
    checks: HashMap<Vec<u8>, SignatureCheck>,
    closed: Arc<AtomicBool>,
}

impl TableVerifier {
    fn new(checks: HashMap<Vec<u8>, SignatureCheck>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                imported: 0,
                checks,
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }
}

impl PgpVerifier for TableVerifier {
    fn import_key(&mut self, _armored: &str) -> Result<String, KeyringError> {
        let fpr = format!("KEY{:02}", self.imported);
        self.imported += 1;
        Ok(fpr)
    }

    fn set_policy_good(&mut self, _fingerprint: &str) -> Result<(), KeyringError> {
        Ok(())
    }

    fn verify_detached(&self, _data: &[u8], signature: &[u8]) -> SignatureCheck {
        self.checks
            .get(signature)
            .cloned()
            .unwrap_or(SignatureCheck {
                status: SigStatus::Indeterminate,
                fingerprint: None,
            })
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A verifier whose imports always fail.
struct BrokenImportVerifier;

impl PgpVerifier for BrokenImportVerifier {
    fn import_key(&mut self, _armored: &str) -> Result<String, KeyringError> {
        Err(KeyringError::ImportFailed {
            reason: "no engine".into(),
        })
    }

    fn set_policy_good(&mut self, _fingerprint: &str) -> Result<(), KeyringError> {
        Ok(())
    }

    fn verify_detached(&self, _data: &[u8], _signature: &[u8]) -> SignatureCheck {
        SignatureCheck {
            status: SigStatus::Indeterminate,
            fingerprint: None,
        }
    }

    fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// Fixture plumbing
// ---------------------------------------------------------------------------

fn good(fingerprint: &str) -> SignatureCheck {
    SignatureCheck {
        status: SigStatus::Good,
        fingerprint: Some(fingerprint.to_string()),
    }
}

fn bad() -> SignatureCheck {
    SignatureCheck {
        status: SigStatus::Bad,
        fingerprint: Some("KEY00".to_string()),
    }
}

fn test_config() -> UpdaterConfig {
    UpdaterConfig {
        software: "monero".into(),
        build_tag: "linux-x64".into(),
        current_version: String::new(),
        dns_hosts: (0..4).map(|i| format!("ep{}.test", i)).collect(),
        ..UpdaterConfig::default()
    }
}

fn usable(records: &[String]) -> DnsQueryResult {
    DnsQueryResult {
        records: records.to_vec(),
        dnssec_available: true,
        dnssec_valid: true,
    }
}

/// Resolver where the listed endpoints all return `records` validated.
fn resolver_with(endpoints: &[usize], records: &[String]) -> Arc<CannedResolver> {
    let answers = endpoints
        .iter()
        .map(|i| (format!("ep{}.test", i), usable(records)))
        .collect();
    Arc::new(CannedResolver { answers })
}

fn update_record(hash: &str) -> String {
    format!("monero:linux-x64:{}:{}", VERSION, hash)
}

fn tree_page(users: &[&str]) -> String {
    users
        .iter()
        .map(|u| format!("<a href=\"{}/{}\">{}</a>", TREE_PATH, u, u))
        .collect::<Vec<_>>()
        .join("\n")
}

fn assert_doc(hash: &str) -> String {
    format!(
        "{}  {}\nfeedface00  monero-x86_64-linux-gnu-debug-v0.18.3.1.tar.bz2\n",
        hash, GITIAN_FILENAME
    )
}

/// Publish a signer's assert and signature documents.
fn publish_signer(server: &DocServer, user: &str, assert_hash: &str) {
    let base = format!("{}/{}/monero-linux-0.18-build.assert", BLOB_BASE, user);
    server.insert(&base, assert_doc(assert_hash));
    server.insert(&format!("{}.sig", base), format!("sig:{}", user));
}

fn sig_bytes(user: &str) -> Vec<u8> {
    format!("sig:{}", user).into_bytes()
}

async fn wait_terminal(updater: &Updater, events: &mut UnboundedReceiver<UpdateEvent>) -> State {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("bus closed before terminal");
            if let UpdateEvent::StateOutcomeChanged { outcome } = event {
                if outcome != Tristate::Unknown {
                    return updater.state();
                }
            }
        }
    })
    .await
    .expect("updater did not reach a terminal state")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_reaches_valid_update() {
    let hash = artifact_hash();
    let record = update_record(&hash);
    let resolver = resolver_with(&[0, 2], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "bob", "carol"]));
    for user in ["alice", "bob", "carol"] {
        publish_signer(&server, user, &hash);
    }
    server.insert(DOWNLOAD_URL, ARTIFACT);

    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("bob"), good("KEY01")),
        (sig_bytes("carol"), good("KEY02")),
    ]);
    let (verifier, keyring_closed) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    let terminal = wait_terminal(&updater, &mut events).await;
    assert_eq!(terminal, State::ValidUpdate);
    assert_eq!(updater.state_outcome(), Tristate::True);
    assert_eq!(updater.dns_valid(), Tristate::True);
    assert_eq!(updater.hash_valid(), Tristate::True);
    assert_eq!(updater.version(), VERSION);
    assert_eq!(updater.valid_gitian_sigs(), 3);
    assert_eq!(updater.processed_gitian_sigs(), 3);
    assert_eq!(updater.total_gitian_sigs(), 3);
    assert!(keyring_closed.load(Ordering::SeqCst));

    // The staged file exists and hashes to the advertised value.
    let path = updater.download_path().expect("download path set");
    let staged = std::fs::read(&path).unwrap();
    assert_eq!(hex::encode(Sha256::digest(&staged)), hash);
    std::fs::remove_file(&path).ok();

    assert!(updater
        .messages()
        .iter()
        .any(|m| m.starts_with("Update verified, hash")));

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_single_endpoint_fails_dns_quorum() {
    let record = update_record(&artifact_hash());
    let resolver = resolver_with(&[0], std::slice::from_ref(&record));
    let (verifier, _) = TableVerifier::new(HashMap::new());

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(DocServer::default()),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(wait_terminal(&updater, &mut events).await, State::DnsFailed);
    assert_eq!(updater.dns_valid(), Tristate::False);

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_ambiguous_version_means_no_update_info() {
    let records = vec![
        update_record(&"a".repeat(64)),
        update_record(&"b".repeat(64)),
    ];
    let resolver = resolver_with(&[0, 1], &records);
    let (verifier, _) = TableVerifier::new(HashMap::new());

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(DocServer::default()),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::NoUpdateInfoFound
    );
    assert_eq!(updater.version(), "");

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_one_red_signature_overrides_three_valid() {
    let hash = artifact_hash();
    let record = update_record(&hash);
    let resolver = resolver_with(&[1, 3], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "bob", "carol", "eve"]));
    for user in ["alice", "bob", "carol", "eve"] {
        publish_signer(&server, user, &hash);
    }
    server.insert(DOWNLOAD_URL, ARTIFACT);

    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("bob"), good("KEY01")),
        (sig_bytes("carol"), good("KEY02")),
        (sig_bytes("eve"), bad()),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::BadGitianSigs
    );
    assert_eq!(updater.valid_gitian_sigs(), 3);
    assert!(updater
        .messages()
        .iter()
        .any(|m| m.contains("Bad Gitian signature from eve")));

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_unknown_signers_do_not_count() {
    let hash = artifact_hash();
    let record = update_record(&hash);
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["mallory", "mike"]));
    publish_signer(&server, "mallory", &hash);
    publish_signer(&server, "mike", &hash);

    let checks = HashMap::from([
        (sig_bytes("mallory"), good("STRANGER01")),
        (sig_bytes("mike"), good("STRANGER02")),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::NotEnoughGitianSigs
    );
    assert_eq!(updater.valid_gitian_sigs(), 0);
    assert_eq!(updater.processed_gitian_sigs(), 2);

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_duplicate_fingerprint_counts_once() {
    let hash = artifact_hash();
    let record = update_record(&hash);
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "dave"]));
    publish_signer(&server, "alice", &hash);
    publish_signer(&server, "dave", &hash);

    // Both signatures trace to the same key.
    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("dave"), good("KEY00")),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::NotEnoughGitianSigs
    );
    assert_eq!(updater.valid_gitian_sigs(), 1);
    assert!(updater
        .messages()
        .iter()
        .any(|m| m.starts_with("Duplicate Gitian signature from dave")));

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_hash_mismatch_after_download() {
    // DNS advertises a hash the artifact will not match; the assertions
    // agree with DNS, so the failure surfaces at the hash gate.
    let advertised = "c".repeat(64);
    let record = update_record(&advertised);
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "bob"]));
    publish_signer(&server, "alice", &advertised);
    publish_signer(&server, "bob", &advertised);
    server.insert(DOWNLOAD_URL, ARTIFACT);

    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("bob"), good("KEY01")),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(wait_terminal(&updater, &mut events).await, State::BadHash);
    assert_eq!(updater.hash_valid(), Tristate::False);
    if let Some(path) = updater.download_path() {
        std::fs::remove_file(path).ok();
    }

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_pubkey_import_failure_is_terminal() {
    let record = update_record(&artifact_hash());
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(DocServer::default()),
        Box::new(BrokenImportVerifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::PubkeyImportFailed
    );

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_missing_tree_index_means_no_gitian_sigs() {
    let record = update_record(&artifact_hash());
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));
    let (verifier, keyring_closed) = TableVerifier::new(HashMap::new());

    // The doc server has no tree page at all.
    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(DocServer::default()),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::NoGitianSigs
    );
    // The keyring home must be released on this exit path too.
    assert!(keyring_closed.load(Ordering::SeqCst));

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_download_retry_recovers() {
    let hash = artifact_hash();
    let record = update_record(&hash);
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "bob"]));
    publish_signer(&server, "alice", &hash);
    publish_signer(&server, "bob", &hash);
    // The artifact is missing on the first attempt.

    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("bob"), good("KEY01")),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server.clone()),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("cli");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::DownloadFailed
    );

    // Publish the artifact and retry.
    server.insert(DOWNLOAD_URL, ARTIFACT);
    updater.retry_download();

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::ValidUpdate
    );
    if let Some(path) = updater.download_path() {
        std::fs::remove_file(path).ok();
    }

    updater.shutdown();
    updater.join().await;
}

#[tokio::test]
async fn test_up_to_date_and_back_in_time() {
    let hash = artifact_hash();
    let record = update_record(&hash);

    for (current, expected) in [
        (VERSION, State::UpToDate),
        ("0.19.0.0", State::BackInTime),
    ] {
        let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));
        let (verifier, _) = TableVerifier::new(HashMap::new());
        let config = UpdaterConfig {
            current_version: current.into(),
            ..test_config()
        };
        let updater = Updater::new(
            config,
            resolver,
            Arc::new(DocServer::default()),
            Box::new(verifier),
        );
        let mut events = updater.subscribe();
        updater.select("cli");

        assert_eq!(wait_terminal(&updater, &mut events).await, expected);
        assert_eq!(updater.state_outcome(), Tristate::True);

        updater.shutdown();
        updater.join().await;
    }
}

#[tokio::test]
async fn test_gui_selection_queries_gui_software() {
    // The GUI variant downloads from the host root, not cli/.
    let hash = artifact_hash();
    let record = format!("monero-gui:linux-x64:{}:{}", VERSION, hash);
    let resolver = resolver_with(&[0, 1], std::slice::from_ref(&record));

    let server = DocServer::default();
    server.insert(TREE_URL, tree_page(&["alice", "bob"]));
    for user in ["alice", "bob"] {
        let base = format!("{}/{}/monero-gui-linux-0.18-build.assert", BLOB_BASE, user);
        server.insert(
            &base,
            format!("{}  monero-gui-x86_64-linux-gnu-v0.18.3.1.tar.bz2\n", hash),
        );
        server.insert(&format!("{}.sig", base), format!("sig:{}", user));
    }
    server.insert(
        "https://downloads.getmonero.org/monero-gui-linux-x64-v0.18.3.1.tar.bz2",
        ARTIFACT,
    );

    let checks = HashMap::from([
        (sig_bytes("alice"), good("KEY00")),
        (sig_bytes("bob"), good("KEY01")),
    ]);
    let (verifier, _) = TableVerifier::new(checks);

    let updater = Updater::new(
        test_config(),
        resolver,
        Arc::new(server),
        Box::new(verifier),
    );
    let mut events = updater.subscribe();
    updater.select("gui");

    assert_eq!(
        wait_terminal(&updater, &mut events).await,
        State::ValidUpdate
    );
    if let Some(path) = updater.download_path() {
        std::fs::remove_file(path).ok();
    }

    updater.shutdown();
    updater.join().await;
}
