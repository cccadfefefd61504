//! monero-update CLI - verify and stage the latest Monero release.
//!
//! Drives the updater state machine non-interactively: the variant comes
//! from the command line, events stream to stdout, and the exit code
//! reflects the final outcome.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use monero_update_core::{
    DnssecTxtResolver, HttpFetcher, Tristate, UpdateEvent, Updater, UpdaterConfig,
};
use monero_update_keyring::EphemeralKeyring;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Verify and stage the latest Monero release.
///
/// The updater discovers the newest published version over the MoneroPulse
/// DNSSEC channels, requires two independent channels to agree, checks a
/// threshold of Gitian reproducible-build attestations from known release
/// engineers, then downloads the artifact and verifies its SHA-256 against
/// the DNS-advertised hash. Nothing is installed; the verified file is
/// left in a temporary location for the operator.
#[derive(Parser)]
#[command(name = "monero-update")]
#[command(version = VERSION)]
#[command(about = "DNSSEC- and Gitian-verified Monero release downloader")]
struct Cli {
    /// Software variant to check: "cli" or "gui"
    #[arg(long, default_value = "cli")]
    variant: String,

    /// Version currently installed (empty means: any release is newer)
    #[arg(long, default_value = "")]
    current_version: String,

    /// Override the detected platform build tag
    #[arg(long)]
    build_tag: Option<String>,

    /// Per-operation network timeout in seconds
    #[arg(long, default_value = "20")]
    timeout: u64,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(json: bool, verbose: bool) {
    let level = if json {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn render_text(event: &UpdateEvent) {
    match event {
        UpdateEvent::StateChanged { state } => println!("[state] {}", state),
        UpdateEvent::Message { text } => println!("        {}", text),
        UpdateEvent::VersionChanged { version } if !version.is_empty() => {
            println!("[version] {}", version);
        }
        UpdateEvent::DownloadProgress { downloaded, total } if *total > 0 => {
            print!("\r[download] {}/{} bytes", downloaded, total);
        }
        UpdateEvent::DownloadProgress { downloaded, .. } => {
            print!("\r[download] {} bytes", downloaded);
        }
        UpdateEvent::DownloadFinished { .. } => println!(),
        UpdateEvent::ValidUpdateReady { path } => {
            println!("[ready] verified update staged at {}", path.display());
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_output = cli.format == "json";
    init_logging(json_output, cli.verbose);

    let mut config = UpdaterConfig {
        current_version: cli.current_version.clone(),
        timeout: Duration::from_secs(cli.timeout),
        ..UpdaterConfig::default()
    };
    if let Some(tag) = cli.build_tag {
        config.build_tag = tag;
    }

    let keyring = EphemeralKeyring::new();
    let fetcher = match HttpFetcher::new(config.timeout) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            eprintln!("cannot create HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let resolver = DnssecTxtResolver::new(config.timeout);

    let updater = Updater::new(
        config,
        Arc::new(resolver),
        Arc::new(fetcher),
        Box::new(keyring),
    );
    let mut events = updater.subscribe();
    updater.select(&cli.variant);

    let mut outcome = Tristate::Unknown;
    while let Some(event) = events.recv().await {
        if json_output {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("cannot encode event: {}", e),
            }
        } else {
            render_text(&event);
        }
        if let UpdateEvent::StateOutcomeChanged { outcome: o } = event {
            if o != Tristate::Unknown {
                outcome = o;
                break;
            }
        }
    }

    updater.shutdown();
    updater.join().await;

    match outcome {
        Tristate::True => std::process::exit(0),
        _ => std::process::exit(1),
    }
}
