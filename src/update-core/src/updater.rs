//! The updater state machine.
//!
//! One background task drives the engines through a strict order:
//! selection → DNS consensus → version selection → key import → Gitian
//! threshold verification → download → hash check. Every arrow is gated on
//! the predecessor's success; failures divert to typed terminal states.
//!
//! The UI collaborator never calls into the engines. It observes the
//! [`NotificationBus`](crate::bus::NotificationBus) and sends commands
//! (variant selection, download retry, shutdown) over a one-way queue,
//! which the driver consumes at well-defined wait points. Counters and
//! tristates live in atomics so getters never contend with a running
//! engine; only the session's compound fields sit behind a mutex.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use monero_update_keyring::PgpVerifier;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::bus::{NotificationBus, UpdateEvent};
use crate::config::UpdaterConfig;
use crate::dns::{self, TxtResolver};
use crate::download::{self, Fetcher};
use crate::gitian::{self, GitianJob, VerificationCounters};
use crate::hash;
use crate::keys;
use crate::types::{State, Tristate};
use crate::urls;
use crate::version;

/// Commands from the UI collaborator.
#[derive(Debug, Clone)]
enum Command {
    /// Choose the software variant and start the run.
    Select(String),
    /// Re-enter `Download` after a failed download.
    RetryDownload,
    /// Stop the driver.
    Shutdown,
}

/// Compound per-run fields, guarded by one mutex.
#[derive(Default)]
struct Session {
    state: Option<State>,
    next_state: Option<State>,
    software: String,
    version: String,
    expected_hash: String,
    consensus_records: Vec<String>,
    signers: Vec<String>,
    imported_fingerprints: BTreeMap<String, String>,
    download_path: Option<PathBuf>,
}

struct UpdaterInner {
    config: UpdaterConfig,
    bus: NotificationBus,
    resolver: Arc<dyn TxtResolver>,
    fetcher: Arc<dyn Fetcher>,
    verifier: Mutex<Box<dyn PgpVerifier>>,
    session: Mutex<Session>,
    dns_valid: AtomicU8,
    hash_valid: AtomicU8,
    counters: VerificationCounters,
}

/// The update verifier.
///
/// Construction spawns the background driver, which immediately enters
/// `Init` and waits for [`Updater::select`]. Must be created inside a Tokio
/// runtime.
pub struct Updater {
    inner: Arc<UpdaterInner>,
    commands: UnboundedSender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Updater {
    /// Create the updater and start its driver task.
    #[must_use]
    pub fn new(
        config: UpdaterConfig,
        resolver: Arc<dyn TxtResolver>,
        fetcher: Arc<dyn Fetcher>,
        verifier: Box<dyn PgpVerifier>,
    ) -> Self {
        let session = Session {
            state: Some(State::None),
            next_state: Some(State::Init),
            software: config.software.clone(),
            ..Session::default()
        };
        let inner = Arc::new(UpdaterInner {
            config,
            bus: NotificationBus::new(),
            resolver,
            fetcher,
            verifier: Mutex::new(verifier),
            session: Mutex::new(session),
            dns_valid: AtomicU8::new(Tristate::Unknown.as_u8()),
            hash_valid: AtomicU8::new(Tristate::Unknown.as_u8()),
            counters: VerificationCounters::default(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(Arc::clone(&inner), rx));

        Self {
            inner,
            commands: tx,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Subscribe to the notification bus.
    pub fn subscribe(&self) -> UnboundedReceiver<UpdateEvent> {
        self.inner.bus.subscribe()
    }

    /// Choose the software variant: `"gui"` or `"cli"`.
    pub fn select(&self, variant: &str) {
        let _ = self.commands.send(Command::Select(variant.to_string()));
    }

    /// Retry a failed download. Ignored in any state but `DownloadFailed`.
    pub fn retry_download(&self) {
        let _ = self.commands.send(Command::RetryDownload);
    }

    /// Ask the driver to stop.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Wait for the driver task to finish. Call [`Updater::shutdown`] first.
    pub async fn join(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "driver task aborted");
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.session().state.unwrap_or(State::None)
    }

    /// Outcome of the current state.
    #[must_use]
    pub fn state_outcome(&self) -> Tristate {
        self.state().outcome()
    }

    /// Whether the variant chooser should be showing.
    #[must_use]
    pub fn selecting(&self) -> bool {
        self.state() == State::Init
    }

    /// The selected update version; empty while unresolved.
    #[must_use]
    pub fn version(&self) -> String {
        self.session().version.clone()
    }

    /// DNS consensus check status.
    #[must_use]
    pub fn dns_valid(&self) -> Tristate {
        Tristate::from_u8(self.inner.dns_valid.load(Ordering::SeqCst))
    }

    /// Artifact hash check status.
    #[must_use]
    pub fn hash_valid(&self) -> Tristate {
        Tristate::from_u8(self.inner.hash_valid.load(Ordering::SeqCst))
    }

    /// Distinct, known-signer, hash-matching signatures counted so far.
    #[must_use]
    pub fn valid_gitian_sigs(&self) -> u32 {
        self.inner.counters.valid()
    }

    /// Signature threshold in force.
    #[must_use]
    pub fn min_valid_gitian_sigs(&self) -> u32 {
        self.inner.counters.min_required()
    }

    /// Signer candidates processed so far.
    #[must_use]
    pub fn processed_gitian_sigs(&self) -> u32 {
        self.inner.counters.processed()
    }

    /// Signer candidates discovered.
    #[must_use]
    pub fn total_gitian_sigs(&self) -> u32 {
        self.inner.counters.total()
    }

    /// Path of the staged artifact, once a download started.
    #[must_use]
    pub fn download_path(&self) -> Option<PathBuf> {
        self.session().download_path.clone()
    }

    /// All diagnostic messages published so far, in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.inner.bus.messages()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Updater {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl UpdaterInner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_next_state(&self, state: State) {
        self.session().next_state = Some(state);
    }

    /// Commit a pending state change and notify, outside the session lock.
    fn commit_pending(&self) -> State {
        let (state, changed) = {
            let mut session = self.session();
            let next = session.next_state.unwrap_or(State::None);
            if session.state == session.next_state {
                (next, false)
            } else {
                session.state = Some(next);
                (next, true)
            }
        };
        if changed {
            self.bus.publish(UpdateEvent::StateChanged {
                state: state.display().to_string(),
            });
            self.bus.publish(UpdateEvent::StateOutcomeChanged {
                outcome: state.outcome(),
            });
            self.bus.publish(UpdateEvent::SelectingChanged {
                selecting: state == State::Init,
            });
        }
        state
    }

    fn set_dns_valid(&self, value: Tristate) {
        self.dns_valid.store(value.as_u8(), Ordering::SeqCst);
        self.bus.publish(UpdateEvent::DnsValidChanged { valid: value });
    }

    fn set_hash_valid(&self, value: Tristate) {
        self.hash_valid.store(value.as_u8(), Ordering::SeqCst);
        self.bus.publish(UpdateEvent::HashValidChanged { valid: value });
    }

    fn set_version(&self, value: String) {
        self.session().version = value.clone();
        self.bus.publish(UpdateEvent::VersionChanged { version: value });
    }

    /// On-entry action for `Init`: reset every gate and tristate.
    fn reset_gates(&self) {
        self.set_dns_valid(Tristate::Unknown);
        self.set_hash_valid(Tristate::Unknown);
        self.counters.reset(&self.bus);
        self.counters.set_min_required(0, &self.bus);
        let mut session = self.session();
        session.version.clear();
        session.expected_hash.clear();
        session.consensus_records.clear();
        session.signers.clear();
        session.imported_fingerprints.clear();
        session.download_path = None;
    }

    /// Map a variant choice onto a software identity.
    fn apply_selection(&self, choice: &str) -> bool {
        let software = match choice {
            "gui" => "monero-gui",
            "cli" => "monero",
            other => {
                error!("Invalid selection: {}", other);
                return false;
            }
        };
        self.session().software = software.to_string();
        true
    }

    /// Drop the ephemeral keyring home. Idempotent.
    fn close_keyring(&self) {
        self.verifier
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
    }
}

/// The background driver loop.
#[instrument(skip_all)]
async fn drive(inner: Arc<UpdaterInner>, mut commands: UnboundedReceiver<Command>) {
    loop {
        let state = inner.commit_pending();
        match state {
            State::None => {
                // Only reachable if construction raced shutdown.
                return;
            }

            State::Init => {
                inner.reset_gates();
                loop {
                    match commands.recv().await {
                        Some(Command::Select(choice)) => {
                            if inner.apply_selection(&choice) {
                                inner.set_next_state(State::QueryDns);
                                break;
                            }
                        }
                        Some(Command::RetryDownload) => {}
                        Some(Command::Shutdown) | None => return,
                    }
                }
            }

            State::QueryDns => {
                inner.set_dns_valid(Tristate::Unknown);
                let consensus =
                    dns::resolve_consensus(&inner.resolver, &inner.config.dns_hosts, &inner.bus)
                        .await;
                inner.set_dns_valid(consensus.outcome);
                if consensus.outcome == Tristate::True && !consensus.records.is_empty() {
                    inner.session().consensus_records = consensus.records;
                    inner.set_next_state(State::CheckVersion);
                } else {
                    inner.set_next_state(State::DnsFailed);
                }
            }

            State::CheckVersion => {
                inner.set_version(String::new());
                let (software, records) = {
                    let session = inner.session();
                    (session.software.clone(), session.consensus_records.clone())
                };
                match version::select_version(
                    &software,
                    &inner.config.build_tag,
                    &records,
                    &inner.bus,
                ) {
                    None => inner.set_next_state(State::NoUpdateInfoFound),
                    Some(selection) => {
                        inner.session().expected_hash = selection.hash.clone();
                        inner.set_version(selection.version.clone());
                        use std::cmp::Ordering::{Equal, Greater, Less};
                        match version::vercmp(&selection.version, &inner.config.current_version) {
                            Greater => inner.set_next_state(State::ImportPubkeys),
                            Less => inner.set_next_state(State::BackInTime),
                            Equal => inner.set_next_state(State::UpToDate),
                        }
                    }
                }
            }

            State::ImportPubkeys => {
                let result = {
                    let mut verifier = inner.verifier.lock().unwrap_or_else(|e| e.into_inner());
                    keys::import_keys(&mut **verifier, keys::RELEASE_SIGNER_KEYS, &inner.bus)
                };
                match result {
                    Ok(imported) => {
                        inner.session().imported_fingerprints = imported;
                        inner.set_next_state(State::FetchGitianSigs);
                    }
                    Err(e) => {
                        inner
                            .bus
                            .message(format!("Failed to import public keys: {}", e));
                        inner.set_next_state(State::PubkeyImportFailed);
                    }
                }
            }

            State::FetchGitianSigs => {
                inner.counters.reset(&inner.bus);
                let version = inner.session().version.clone();
                let platform = urls::gitian_platform(&inner.config.build_tag).to_string();
                match gitian::discover_signers(
                    &inner.fetcher,
                    &inner.config.vcs_host,
                    &inner.config.project,
                    &version,
                    &platform,
                    &inner.bus,
                )
                .await
                {
                    None => {
                        inner.close_keyring();
                        inner.set_next_state(State::NoGitianSigs);
                    }
                    Some(users) if users.is_empty() => {
                        inner.bus.message("No Gitian signatures found");
                        inner.close_keyring();
                        inner.set_next_state(State::NoGitianSigs);
                    }
                    Some(users) => {
                        inner.session().signers = users;
                        inner.set_next_state(State::VerifyGitianSignatures);
                    }
                }
            }

            State::VerifyGitianSignatures => {
                let (software, version, expected_hash, users, imported) = {
                    let session = inner.session();
                    (
                        session.software.clone(),
                        session.version.clone(),
                        session.expected_hash.clone(),
                        session.signers.clone(),
                        session.imported_fingerprints.clone(),
                    )
                };
                let config = &inner.config;
                inner.counters.set_valid(0, &inner.bus);
                inner
                    .counters
                    .set_min_required(config.min_gitian_sigs, &inner.bus);
                inner.counters.set_total(users.len() as u32, &inner.bus);

                // The assertion must name the artifact as Gitian built it,
                // which uses the Gitian toolchain tag, not the DNS one.
                let platform = urls::gitian_platform(&config.build_tag).to_string();
                let subdir = urls::subdir_for(&software, &config.build_tag);
                let gitian_tag = urls::gitian_build_tag(&config.build_tag);
                let artifact_url = urls::update_url(
                    &config.download_base,
                    &software,
                    subdir,
                    gitian_tag,
                    &version,
                );
                let job = GitianJob {
                    software,
                    platform: platform.clone(),
                    version: version.clone(),
                    filename: urls::artifact_filename(&artifact_url),
                    expected_hash,
                    blob_base: urls::gitian_blob_base(
                        &config.raw_host,
                        &config.project,
                        &version,
                        &platform,
                    ),
                };

                let tally = gitian::verify_signers(
                    &inner.fetcher,
                    &inner.verifier,
                    &imported,
                    &users,
                    &job,
                    &inner.counters,
                    &inner.bus,
                )
                .await;
                inner.close_keyring();

                if tally.accepted(config.min_gitian_sigs) {
                    inner.set_next_state(State::Download);
                } else if tally.bad_found {
                    inner.set_next_state(State::BadGitianSigs);
                } else {
                    inner.set_next_state(State::NotEnoughGitianSigs);
                }
            }

            State::Download => {
                let (software, version) = {
                    let session = inner.session();
                    (session.software.clone(), session.version.clone())
                };
                let config = &inner.config;
                let subdir = urls::subdir_for(&software, &config.build_tag);
                let url = urls::update_url(
                    &config.download_base,
                    &software,
                    subdir,
                    &config.build_tag,
                    &version,
                );
                let path = download::unique_download_path(&urls::artifact_filename(&url));
                inner.session().download_path = Some(path.clone());
                inner
                    .bus
                    .message(format!("Downloading {} to {}", url, path.display()));
                inner.bus.publish(UpdateEvent::DownloadStarted);

                let progress: download::ProgressFn = {
                    let inner = Arc::clone(&inner);
                    Box::new(move |downloaded: u64, total: i64| {
                        inner
                            .bus
                            .publish(UpdateEvent::DownloadProgress { downloaded, total });
                    })
                };

                let fetcher = Arc::clone(&inner.fetcher);
                let mut transfer = Box::pin(fetcher.download(&url, &path, progress));
                let result = loop {
                    tokio::select! {
                        result = &mut transfer => break Some(result),
                        command = commands.recv() => match command {
                            Some(Command::Shutdown) | None => break None,
                            // Selection and retry are meaningless mid-download.
                            Some(_) => {}
                        }
                    }
                };
                drop(transfer);
                let Some(result) = result else { return };

                let success = match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "download failed");
                        false
                    }
                };
                inner.bus.message(format!(
                    "Download finished: {}",
                    if success { "success" } else { "failed" }
                ));
                inner
                    .bus
                    .publish(UpdateEvent::DownloadFinished { success });
                inner.set_next_state(if success {
                    State::CheckHash
                } else {
                    State::DownloadFailed
                });
            }

            State::CheckHash => {
                inner.set_hash_valid(Tristate::Unknown);
                let (path, expected) = {
                    let session = inner.session();
                    (session.download_path.clone(), session.expected_hash.clone())
                };
                let digest = match path {
                    Some(path) => hash::sha256_file_hex(&path).await.map(|d| (path, d)),
                    None => Err(crate::error::UpdateError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no downloaded file",
                    ))),
                };
                match digest {
                    Err(e) => {
                        warn!(error = %e, "hashing the downloaded file failed");
                        inner.bus.message("Error calculating file hash");
                        inner.set_hash_valid(Tristate::False);
                        inner.set_next_state(State::BadHash);
                    }
                    Ok((_, digest)) if !hash::hashes_match(&digest, &expected) => {
                        inner.bus.message("Invalid file hash");
                        inner.set_hash_valid(Tristate::False);
                        inner.set_next_state(State::BadHash);
                    }
                    Ok((path, digest)) => {
                        inner
                            .bus
                            .message(format!("Update verified, hash {}", digest));
                        inner.bus.publish(UpdateEvent::ValidUpdateReady { path });
                        inner.set_hash_valid(Tristate::True);
                        inner.set_next_state(State::ValidUpdate);
                    }
                }
            }

            terminal => {
                info!(
                    state = terminal.display(),
                    outcome = ?terminal.outcome(),
                    "run reached a terminal state"
                );
                loop {
                    match commands.recv().await {
                        Some(Command::RetryDownload) if terminal == State::DownloadFailed => {
                            inner.set_next_state(State::Download);
                            break;
                        }
                        Some(Command::Select(choice)) => {
                            if inner.apply_selection(&choice) {
                                inner.set_next_state(State::QueryDns);
                                break;
                            }
                        }
                        Some(Command::RetryDownload) => {}
                        Some(Command::Shutdown) | None => return,
                    }
                }
            }
        }
    }
}
