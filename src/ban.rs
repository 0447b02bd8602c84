//!
//! Silent-suspension detection for Highlight AI accounts.
//!
//! The vendor never surfaces an account ban as an HTTP error. It degrades the
//! account instead: chat requests still return 200 streams, but the content
//! is a canned suspension message delivered token-by-token, or ordinary-looking
//! text throttled into a distinctive timing shape. Two independent detectors
//! cover the two shapes; either one is sufficient to quarantine a session.
//!
//! The content detector matches the accumulated response against a catalogue
//! of known suspension messages as it grows. The timing detector runs once
//! over a completed stream's inter-arrival delays and fragment lengths, and
//! feeds newly discovered suspension wording back into the catalogue.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{HighlightError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Verdict of the incremental content-signature match.
///
/// `NeedMoreContent` means the accumulated text is a strict prefix of at
/// least one catalogue entry but not yet long enough to call - the caller
/// must withhold the latest fragment and re-evaluate on the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /** the accumulated text is (or sufficiently covers) a known signature */
    MatchSuccess,
    /** no catalogue entry starts with the accumulated text */
    NoMatch,
    /** prefix of a known signature; withhold output and keep reading */
    NeedMoreContent,
}

///
/// File-backed catalogue of known suspension messages.
///
/// Loaded once at startup, shared process-wide, append-only at runtime.
/// Appends are durable before they are effective: the updated file is
/// written (temp + rename) before the in-memory set changes, so the two
/// never diverge after a successful append.
pub struct SignatureCatalog {
    /** catalogue file location */
    path: PathBuf,
    /** fraction of an entry's length the accumulated text must reach */
    threshold: f64,
    /** in-memory signature set, hot path for per-fragment matching */
    entries: RwLock<HashSet<String>>,
    /** serializes appends so concurrent streams cannot interleave writes */
    append_lock: Mutex<()>,
}

///
/// Per-stream timing observations.
///
/// One instance per chat stream. Records the inter-arrival delay and text of
/// every fragment; evaluated once after the stream completes and then
/// discarded. Never persisted.
#[derive(Debug, Default)]
pub struct StreamTiming {
    /** arrival instant of the previous fragment */
    last_arrival: Option<Instant>,
    /** inter-arrival delays in milliseconds (n fragments give n-1 delays) */
    delays_ms: Vec<u64>,
    /** fragment texts, in arrival order */
    fragments: Vec<String>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** delays above this count as throttling stalls, and are excluded from the average */
const STALL_LIMIT_MS: u64 = 1000;

/** more than this many stalls is required for suspicion */
const MIN_STALL_COUNT: usize = 1;

/** suspicious band for the average non-stall delay, exclusive bounds */
const AVG_DELAY_BAND_MS: (f64, f64) = (190.0, 350.0);

/** suspicious band for the average non-empty fragment length, exclusive bounds */
const AVG_FRAGMENT_BAND: (f64, f64) = (4.0, 6.0);

/** minimum number of delay samples before the detector may fire */
const MIN_SAMPLE_COUNT: usize = 25;

/** suspension messages known at first deployment; the file seeds from these */
const SEED_SIGNATURES: &[&str] = &[
    "We've temporarily restricted access to your account due to suspicious activity. \
     If you think this is a mistake, please reach out to us via support@highlightai.com or Discord.",
    "Our monitoring systems have detected behavior associated with policy violations, \
     resulting in account restrictions being applied. For questions or to request a review, \
     please contact us.",
    "Hey there! We\u{2019}ve had to pause some of your account features due to activities that \
     triggered our community guidelines. Think we made an error? Just shoot us a message using \
     the help icon at the top right of this chat!",
    "We\u{2019}ve detected unusual activity on your account and have restricted access to certain \
     features. Please contact our support team if you believe this is an error.",
    "Your account access is limited as a precaution against activity that may conflict with our \
     guidelines. Contact Highlight support if you wish to dispute this action.",
    "We\u{2019}ve restricted your Highlight account. If you believe you\u{2019}re receiving this \
     message in error, please contact our support team at support@highlightai.com.",
    "We've applied a restriction to your account after detecting behavior outside our acceptable \
     use policy. Please get in touch with us if you think this was applied incorrectly.",
];

/* --- start of code -------------------------------------------------------------------------- */

impl SignatureCatalog {
    ///
    /// Load the catalogue from disk, seeding the file if it does not exist.
    ///
    /// # Arguments
    ///  * `path` - catalogue file location
    ///  * `threshold` - match threshold as a fraction of an entry's length
    ///
    /// # Returns
    ///  * Loaded catalogue
    ///  * `HighlightError::Config` on unreadable or malformed file
    pub async fn load(path: PathBuf, threshold: f64) -> Result<Self> {
        if !path.exists() {
            let seeds: Vec<String> = SEED_SIGNATURES.iter().map(|s| s.to_string()).collect();
            write_atomic(&path, &seeds).await?;
            info!(path = %path.display(), "seeded ban-signature catalogue");
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HighlightError::Config(format!("reading ban catalogue: {}", e)))?;
        let entries: HashSet<String> = serde_json::from_str::<Vec<String>>(&contents)
            .map_err(|e| HighlightError::Config(format!("parsing ban catalogue: {}", e)))?
            .into_iter()
            .collect();

        info!(path = %path.display(), entries = entries.len(), "loaded ban-signature catalogue");

        Ok(Self { path, threshold, entries: RwLock::new(entries), append_lock: Mutex::new(()) })
    }

    ///
    /// Match the accumulated response text against the catalogue.
    ///
    /// Evaluated on every fragment with the full response-so-far. An exact
    /// hit, or coverage of at least `threshold` of any entry the text
    /// prefixes, is a confirmed suspension. A bare prefix asks the caller
    /// to withhold output until more content arrives.
    ///
    /// # Arguments
    ///  * `content` - full accumulated response text
    ///
    /// # Returns
    ///  * Match verdict
    pub fn match_content(&self, content: &str) -> MatchOutcome {
        let entries = self.entries.read().expect("signature set poisoned");

        if entries.contains(content) {
            return MatchOutcome::MatchSuccess;
        }

        let content_len = content.chars().count() as f64;
        let mut is_prefix_of_any = false;
        for entry in entries.iter().filter(|e| e.starts_with(content)) {
            is_prefix_of_any = true;
            if content_len >= entry.chars().count() as f64 * self.threshold {
                return MatchOutcome::MatchSuccess;
            }
        }

        if is_prefix_of_any { MatchOutcome::NeedMoreContent } else { MatchOutcome::NoMatch }
    }

    ///
    /// Append a newly confirmed suspension message and persist immediately.
    ///
    /// The file write is the commit point: on I/O failure the in-memory set
    /// is left untouched and the error propagates.
    ///
    /// # Arguments
    ///  * `content` - full response text identified as suspension wording
    ///
    /// # Returns
    ///  * `Ok(())` once the entry is durable
    ///  * `HighlightError::Http` on persistence failure
    pub async fn append(&self, content: String) -> Result<()> {
        let _guard = self.append_lock.lock().await;

        let snapshot: Vec<String> = {
            let entries = self.entries.read().expect("signature set poisoned");
            if entries.contains(&content) {
                return Ok(());
            }
            entries.iter().cloned().chain(std::iter::once(content.clone())).collect()
        };

        write_atomic(&self.path, &snapshot).await?;

        self.entries.write().expect("signature set poisoned").insert(content);
        debug!(entries = snapshot.len(), "ban-signature catalogue extended");
        Ok(())
    }

    ///
    /// Number of known signatures.
    pub fn len(&self) -> usize {
        self.entries.read().expect("signature set poisoned").len()
    }

    ///
    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StreamTiming {
    ///
    /// Create an empty observation window for a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Record the arrival of a text fragment.
    ///
    /// The first arrival sets the reference instant; every later arrival
    /// contributes one inter-arrival delay sample.
    ///
    /// # Arguments
    ///  * `fragment` - fragment text as received from the vendor
    pub fn observe(&mut self, fragment: &str) {
        let now = Instant::now();
        if let Some(last) = self.last_arrival {
            self.delays_ms.push(now.duration_since(last).as_millis() as u64);
        }
        self.last_arrival = Some(now);
        self.fragments.push(fragment.to_string());
    }

    ///
    /// Insert a pre-measured sample directly.
    ///
    /// Used by the aggregation path (which measures delays itself) and by
    /// tests constructing synthetic streams.
    ///
    /// # Arguments
    ///  * `delay_ms` - inter-arrival delay in milliseconds
    ///  * `fragment` - fragment text
    pub fn push_sample(&mut self, delay_ms: u64, fragment: &str) {
        self.delays_ms.push(delay_ms);
        self.fragments.push(fragment.to_string());
    }

    ///
    /// Evaluate the throttled-degradation fingerprint over the whole stream.
    ///
    /// The degraded shape is intermittent ~1 s stalls interleaved with
    /// unnaturally uniform 200-350 ms micro-deliveries of very short
    /// fragments. All four conditions must hold:
    ///  * more than one stall above 1000 ms,
    ///  * average non-stall delay strictly between 190 and 350 ms,
    ///  * average non-empty fragment length strictly between 4 and 6,
    ///  * more than 25 delay samples.
    ///
    /// # Returns
    ///  * `true` if the stream matches the degradation fingerprint
    pub fn is_suspicious(&self) -> bool {
        let stall_count = self.delays_ms.iter().filter(|&&d| d > STALL_LIMIT_MS).count();

        let filtered: Vec<u64> =
            self.delays_ms.iter().copied().filter(|&d| d <= STALL_LIMIT_MS).collect();
        let avg_delay = if filtered.is_empty() {
            0.0
        } else {
            filtered.iter().sum::<u64>() as f64 / filtered.len() as f64
        };

        let non_empty: Vec<&String> =
            self.fragments.iter().filter(|f| !f.is_empty()).collect();
        let avg_fragment_len = if non_empty.is_empty() {
            0.0
        } else {
            non_empty.iter().map(|f| f.chars().count()).sum::<usize>() as f64
                / non_empty.len() as f64
        };

        let sample_count = self.delays_ms.len();

        debug!(
            stall_count,
            avg_delay, avg_fragment_len, sample_count, "stream timing fingerprint"
        );

        let suspicious = stall_count > MIN_STALL_COUNT
            && avg_delay > AVG_DELAY_BAND_MS.0
            && avg_delay < AVG_DELAY_BAND_MS.1
            && avg_fragment_len > AVG_FRAGMENT_BAND.0
            && avg_fragment_len < AVG_FRAGMENT_BAND.1
            && sample_count > MIN_SAMPLE_COUNT;

        if suspicious {
            error!(
                stall_count,
                avg_delay,
                avg_fragment_len,
                sample_count,
                "stream matches suspension throttling fingerprint"
            );
        }

        suspicious
    }

    ///
    /// Full response text, for appending to the signature catalogue.
    pub fn concatenated(&self) -> String {
        self.fragments.concat()
    }
}

///
/// Write the catalogue file atomically (temp file + rename).
///
/// Prevents a crash mid-write from corrupting the catalogue.
async fn write_atomic(path: &Path, entries: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| HighlightError::Http(format!("creating catalogue dir: {}", e)))?;
        }
    }

    let json = serde_json::to_string_pretty(entries)?;
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| HighlightError::Http(format!("writing catalogue temp file: {}", e)))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| HighlightError::Http(format!("renaming catalogue temp file: {}", e)))?;

    Ok(())
}
