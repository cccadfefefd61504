//! DNS consensus resolution.
//!
//! Each configured endpoint is queried for TXT records over a
//! DNSSEC-validating resolver. DNSSEC proves per-endpoint provenance;
//! requiring two independent endpoints to agree on the record set defeats a
//! single-source compromise. One pass, no retries: individual endpoint
//! failures are demoted and logged, only the quorum decision is surfaced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::bus::NotificationBus;
use crate::types::{DnsQueryResult, Tristate};

/// A TXT lookup source. The production implementation validates DNSSEC;
/// tests substitute scripted endpoints.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Query TXT records for one hostname. Failures are folded into the
    /// result rather than surfaced: an endpoint that cannot be validated
    /// simply does not count toward quorum.
    async fn query_txt(&self, hostname: &str) -> DnsQueryResult;
}

/// hickory-resolver backend with DNSSEC validation enabled.
pub struct DnssecTxtResolver {
    validating: TokioAsyncResolver,
    plain: TokioAsyncResolver,
}

impl DnssecTxtResolver {
    /// Create a resolver pair against the system configuration.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        opts.use_hosts_file = false;
        opts.validate = true;
        let validating = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        opts.use_hosts_file = false;
        let plain = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        Self { validating, plain }
    }

    fn collect_records(lookup: &hickory_resolver::lookup::TxtLookup) -> Vec<String> {
        let mut records = Vec::new();
        for txt in lookup.iter() {
            let mut record = String::new();
            for data in txt.txt_data() {
                if let Ok(s) = std::str::from_utf8(data) {
                    record.push_str(s);
                }
            }
            if !record.is_empty() {
                records.push(record);
            }
        }
        records
    }
}

#[async_trait]
impl TxtResolver for DnssecTxtResolver {
    #[instrument(skip(self), fields(hostname = %hostname))]
    async fn query_txt(&self, hostname: &str) -> DnsQueryResult {
        match self.validating.txt_lookup(hostname).await {
            Ok(lookup) => DnsQueryResult {
                records: Self::collect_records(&lookup),
                dnssec_available: true,
                dnssec_valid: true,
            },
            Err(e) => {
                debug!(error = %e, "validating TXT lookup failed, retrying without DNSSEC");
                // Distinguish "zone answers but cannot be validated" from
                // "endpoint unreachable"; either way the endpoint is demoted.
                match self.plain.txt_lookup(hostname).await {
                    Ok(lookup) => DnsQueryResult {
                        records: Self::collect_records(&lookup),
                        dnssec_available: false,
                        dnssec_valid: false,
                    },
                    Err(e) => {
                        warn!(error = %e, "TXT lookup failed");
                        DnsQueryResult::default()
                    }
                }
            }
        }
    }
}

/// Outcome of one consensus pass over all endpoints.
#[derive(Debug, Clone)]
pub struct DnsConsensus {
    /// Quorum decision.
    pub outcome: Tristate,
    /// The agreed record set; empty unless `outcome` is `True`.
    pub records: Vec<String>,
    /// Per-endpoint answers, in endpoint order.
    pub results: Vec<DnsQueryResult>,
}

/// Two record sets agree when they are equal as multisets.
fn records_match(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// Decide consensus over per-endpoint answers.
///
/// Requires at least two endpoints that validated, returned records, and
/// agree with each other; the first agreeing pair (in endpoint order)
/// supplies the consensus set. The decision depends only on which record
/// sets are present, never on endpoint order.
#[must_use]
pub fn compute_consensus(results: Vec<DnsQueryResult>) -> DnsConsensus {
    let num_valid = results.iter().filter(|r| r.is_usable()).count();
    if num_valid < 2 {
        return DnsConsensus {
            outcome: Tristate::False,
            records: Vec::new(),
            results,
        };
    }

    let mut agreed: Option<usize> = None;
    'outer: for i in 0..results.len() {
        if !results[i].is_usable() {
            continue;
        }
        for j in (i + 1)..results.len() {
            if results[j].is_usable() && records_match(&results[i].records, &results[j].records) {
                agreed = Some(i);
                break 'outer;
            }
        }
    }

    match agreed {
        Some(i) => DnsConsensus {
            outcome: Tristate::True,
            records: results[i].records.clone(),
            results,
        },
        None => DnsConsensus {
            outcome: Tristate::False,
            records: Vec::new(),
            results,
        },
    }
}

/// Query all endpoints in parallel and compute the consensus record set.
pub async fn resolve_consensus(
    resolver: &Arc<dyn TxtResolver>,
    hostnames: &[String],
    bus: &NotificationBus,
) -> DnsConsensus {
    bus.message(format!(
        "Lookup up DNS TXT records for: {}",
        hostnames.join(", ")
    ));

    let mut tasks = Vec::with_capacity(hostnames.len());
    for (idx, hostname) in hostnames.iter().enumerate() {
        let resolver = Arc::clone(resolver);
        let hostname = hostname.clone();
        tasks.push(tokio::spawn(async move {
            (idx, resolver.query_txt(&hostname).await)
        }));
    }

    let mut results: Vec<DnsQueryResult> = vec![DnsQueryResult::default(); hostnames.len()];
    for joined in join_all(tasks).await {
        match joined {
            Ok((idx, result)) => results[idx] = result,
            Err(e) => warn!(error = %e, "DNS query task failed"),
        }
    }

    // Report per-endpoint demotions, starting at a rotating index so no
    // single endpoint always heads the log.
    if !hostnames.is_empty() {
        let first = rand::thread_rng().gen_range(0..hostnames.len());
        for offset in 0..hostnames.len() {
            let i = (first + offset) % hostnames.len();
            let url = &hostnames[i];
            if !results[i].dnssec_available {
                bus.message(format!("DNSSEC not available for hostname: {}, skipping.", url));
            } else if !results[i].dnssec_valid {
                bus.message(format!("DNSSEC validation failed for hostname: {}, skipping.", url));
            } else if results[i].records.is_empty() {
                bus.message(format!("No records for hostname: {}, skipping.", url));
            }
        }
    }

    let num_valid = results.iter().filter(|r| r.is_usable()).count();
    let consensus = compute_consensus(results);
    match consensus.outcome {
        Tristate::True => {
            bus.message(format!(
                "Found {}/{} matching DNSSEC records",
                num_valid,
                hostnames.len()
            ));
        }
        _ if num_valid < 2 => {
            bus.message("WARNING: no two valid DNS TXT records were received");
        }
        _ => {
            bus.message("WARNING: no two DNS TXT records matched");
        }
    }
    consensus
}
