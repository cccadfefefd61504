//! Version record parsing and selection.
//!
//! Consensus TXT records have the shape
//! `<software>:<build_tag>:<version>:<hex_hash>`. Records for the local
//! (software, build tag) pair compete on version; the highest one wins.
//! Two records advertising the same version with different hashes are
//! treated as an attack or publishing mistake and void the whole result.

use std::cmp::Ordering;

use tracing::debug;

use crate::bus::NotificationBus;
use crate::types::UpdateRecord;

/// Compare two dotted version strings component-wise and numerically.
///
/// Missing components count as zero, so `1.2` == `1.2.0` and
/// `1.2.1` > `1.2`. Non-numeric trailing characters within a component are
/// ignored, matching C `atoi` semantics.
#[must_use]
pub fn vercmp(a: &str, b: &str) -> Ordering {
    let parse = |part: &str| -> u64 {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().unwrap_or(0)
    };
    let av: Vec<u64> = a.split('.').map(parse).collect();
    let bv: Vec<u64> = b.split('.').map(parse).collect();
    for i in 0..av.len().max(bv.len()) {
        let x = av.get(i).copied().unwrap_or(0);
        let y = bv.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Parse one TXT record into its four fields.
///
/// Returns `None` when the record does not have exactly four
/// colon-separated fields.
#[must_use]
pub fn parse_record(record: &str) -> Option<UpdateRecord> {
    let fields: Vec<&str> = record.split(':').collect();
    if fields.len() != 4 {
        return None;
    }
    Some(UpdateRecord {
        software: fields[0].to_string(),
        build_tag: fields[1].to_string(),
        version: fields[2].to_string(),
        hash: fields[3].to_string(),
    })
}

/// A record survives the hash filter when its hash field is 64 characters
/// long or is entirely alphanumeric. This is the predicate the update
/// channel has always been published against; tightening it would reject
/// records that older clients accept.
fn hash_field_acceptable(hash: &str) -> bool {
    let alnum = hash.chars().all(|c| c.is_ascii_alphanumeric());
    !(hash.len() != 64 && !alnum)
}

/// The winning (version, hash) pair for the local software and build tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSelection {
    /// Selected version string.
    pub version: String,
    /// Expected artifact hash advertised alongside it.
    pub hash: String,
}

/// Pick the highest-version record matching (software, build tag).
///
/// Emits one diagnostic message per record examined. Returns `None` when no
/// record survives, or when two surviving records share the winning version
/// but disagree on the hash.
pub fn select_version(
    software: &str,
    build_tag: &str,
    records: &[String],
    bus: &NotificationBus,
) -> Option<VersionSelection> {
    let mut selected: Option<VersionSelection> = None;

    for record in records {
        bus.message(format!("Got record: {}", record));

        let Some(parsed) = parse_record(record) else {
            bus.message(format!("Updates record does not have 4 fields: {}", record));
            continue;
        };

        if parsed.software != software || parsed.build_tag != build_tag {
            continue;
        }

        if !hash_field_acceptable(&parsed.hash) {
            bus.message(format!("Invalid hash: {}", parsed.hash));
            continue;
        }

        if let Some(current) = &selected {
            match vercmp(&current.version, &parsed.version) {
                Ordering::Greater => continue,
                Ordering::Equal if current.hash != parsed.hash => {
                    bus.message(format!(
                        "Two matches found for {} version {} on {}",
                        software, current.version, build_tag
                    ));
                    return None;
                }
                _ => {}
            }
        }

        bus.message(format!(
            "Found new version {} with hash {}",
            parsed.version, parsed.hash
        ));
        selected = Some(VersionSelection {
            version: parsed.version,
            hash: parsed.hash,
        });
    }

    debug!(
        software = software,
        build_tag = build_tag,
        selected = ?selected,
        "version selection complete"
    );
    selected
}
