//! # Relay Configuration & Constants
//!
//! Every magic number the relay depends on lives here: the transaction wire
//! layout, PoW bounds, timing defaults and the fallback provider list.
//!
//! Runtime settings are resolved exactly once at startup into an immutable
//! [`RelayConfig`] and handed to the dispatcher and the HTTP layer. Nothing
//! downstream reads the environment.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ternary::HASH_LENGTH;

// ---------------------------------------------------------------------------
// Transaction Layout
// ---------------------------------------------------------------------------

/// Length of one encoded transaction in trytes.
pub const TRANSACTION_TRYTES: usize = 2673;

/// Length of one encoded transaction in trits.
pub const TRANSACTION_TRITS: usize = TRANSACTION_TRYTES * 3;

/// Tryte offset and length of every field, in wire order.
pub const SIGNATURE_MESSAGE_FRAGMENT: (usize, usize) = (0, 2187);
pub const ADDRESS: (usize, usize) = (2187, 81);
pub const VALUE: (usize, usize) = (2268, 27);
pub const OBSOLETE_TAG: (usize, usize) = (2295, 27);
pub const TIMESTAMP: (usize, usize) = (2322, 9);
pub const CURRENT_INDEX: (usize, usize) = (2331, 9);
pub const LAST_INDEX: (usize, usize) = (2340, 9);
pub const BUNDLE: (usize, usize) = (2349, 81);
pub const TRUNK_TRANSACTION: (usize, usize) = (2430, 81);
pub const BRANCH_TRANSACTION: (usize, usize) = (2511, 81);
pub const TAG: (usize, usize) = (2592, 27);
pub const ATTACHMENT_TIMESTAMP: (usize, usize) = (2619, 9);
pub const ATTACHMENT_TIMESTAMP_LOWER_BOUND: (usize, usize) = (2628, 9);
pub const ATTACHMENT_TIMESTAMP_UPPER_BOUND: (usize, usize) = (2637, 9);
pub const NONCE: (usize, usize) = (2646, 27);

/// Trits of the value field that carry the amount. The rest must be zero.
pub const VALUE_USABLE_TRITS: usize = 33;

/// Nonce length in trits.
pub const NONCE_TRITS: usize = NONCE.1 * 3;

/// Where the nonce starts inside the final 243-trit block that PoW hashes.
pub const NONCE_OFFSET_IN_LAST_BLOCK: usize = NONCE.0 * 3 - (TRANSACTION_TRITS - HASH_LENGTH);

/// Largest value a 27-trit timestamp can hold: `(3^27 - 1) / 2`.
pub const MAX_TIMESTAMP_VALUE: i64 = 3_812_798_742_493;

// ---------------------------------------------------------------------------
// Proof of Work
// ---------------------------------------------------------------------------

/// Upper bound on min weight magnitude: the whole hash would have to be zero.
pub const MAX_MIN_WEIGHT_MAGNITUDE: usize = HASH_LENGTH;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long the submit endpoint waits on a background broadcast before it
/// answers anyway.
pub const DEFAULT_BROADCAST_DEADLINE_MS: u64 = 3_000;

/// Same as [`DEFAULT_BROADCAST_DEADLINE_MS`], as a `Duration`.
pub const DEFAULT_BROADCAST_DEADLINE: Duration = Duration::from_millis(DEFAULT_BROADCAST_DEADLINE_MS);

/// Gap between the two `/proc/stat` samples used for CPU utilisation.
pub const DEFAULT_STATS_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Per-request ceiling on node HTTP calls. Tip selection on a busy node can
/// take tens of seconds, so this is generous.
pub const NODE_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// TCP connect ceiling for node HTTP calls.
pub const NODE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request ceiling when delivering error reports to a webhook sink.
pub const REPORT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for queued error reports to reach their sinks.
pub const REPORT_DRAIN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Header every node API call must carry.
pub const NODE_API_VERSION_HEADER: &str = "X-IOTA-API-Version";

/// Node API version spoken by the relay.
pub const NODE_API_VERSION: &str = "1";

/// Default Prometheus port.
pub const DEFAULT_METRICS_PORT: u16 = 9743;

/// Public nodes used when no provider is configured.
pub const KNOWN_PROVIDERS: &[&str] = &[
    "https://nodes.thetangle.org:443",
    "https://iotanode.us:443",
    "https://nodes.iota.cafe:443",
    "https://node02.iotatoken.nl:443",
    "https://pow.iota.community:443",
];

/// Pick one of [`KNOWN_PROVIDERS`] at random.
pub fn pick_provider<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    KNOWN_PROVIDERS
        .choose(rng)
        .copied()
        .unwrap_or(KNOWN_PROVIDERS[0])
}

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Raw settings as they arrive from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct RawRelaySettings {
    pub provider: Option<String>,
    pub min_depth: Option<String>,
    pub min_weight_magnitude: Option<String>,
    pub deadline_ms: u64,
    pub error_sink_url: Option<String>,
}

/// Immutable, fully resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Ledger node URL submissions go to.
    pub provider: String,
    /// Tip-selection depth passed to the node.
    pub min_depth: u64,
    /// PoW difficulty: trailing zero trits required in each transaction hash.
    pub min_weight_magnitude: usize,
    /// How long the submit endpoint waits before answering.
    pub deadline: Duration,
    /// Optional webhook for error reports.
    pub error_sink_url: Option<String>,
}

impl RelayConfig {
    /// Resolve raw settings.
    ///
    /// Missing or unparsable numbers become zero and are logged; they do not
    /// stop the process. An empty provider is treated as missing and replaced
    /// by a random known provider.
    pub fn resolve(raw: RawRelaySettings) -> Self {
        let provider = match raw.provider.filter(|p| !p.trim().is_empty()) {
            Some(p) => p,
            None => {
                let picked = pick_provider(&mut rand::thread_rng());
                tracing::info!(provider = picked, "no provider configured, picked a known node");
                picked.to_string()
            }
        };

        let min_depth = parse_or_zero("MIN_DEPTH", raw.min_depth.as_deref());
        let requested_mwm = parse_or_zero("MIN_WEIGHT_MAGNITUDE", raw.min_weight_magnitude.as_deref());
        let min_weight_magnitude = if requested_mwm > MAX_MIN_WEIGHT_MAGNITUDE as u64 {
            tracing::warn!(
                requested = requested_mwm,
                max = MAX_MIN_WEIGHT_MAGNITUDE,
                "MIN_WEIGHT_MAGNITUDE above hash length, clamping"
            );
            MAX_MIN_WEIGHT_MAGNITUDE
        } else {
            requested_mwm as usize
        };

        Self {
            provider,
            min_depth,
            min_weight_magnitude,
            deadline: Duration::from_millis(raw.deadline_ms),
            error_sink_url: raw.error_sink_url.filter(|u| !u.trim().is_empty()),
        }
    }
}

/// Parse an unsigned setting, falling back to zero.
///
/// Zero is a legal value for both numeric settings, but almost never the
/// intended one, so the fallback is always logged.
pub fn parse_or_zero(name: &str, raw: Option<&str>) -> u64 {
    match raw.map(str::trim) {
        None | Some("") => {
            tracing::warn!(setting = name, "setting missing, defaulting to 0");
            0
        }
        Some(value) => value.parse().unwrap_or_else(|e| {
            tracing::warn!(setting = name, value, error = %e, "setting unparsable, defaulting to 0");
            0
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn field_layout_is_contiguous() {
        let fields = [
            SIGNATURE_MESSAGE_FRAGMENT,
            ADDRESS,
            VALUE,
            OBSOLETE_TAG,
            TIMESTAMP,
            CURRENT_INDEX,
            LAST_INDEX,
            BUNDLE,
            TRUNK_TRANSACTION,
            BRANCH_TRANSACTION,
            TAG,
            ATTACHMENT_TIMESTAMP,
            ATTACHMENT_TIMESTAMP_LOWER_BOUND,
            ATTACHMENT_TIMESTAMP_UPPER_BOUND,
            NONCE,
        ];
        let mut expected_offset = 0;
        for (offset, len) in fields {
            assert_eq!(offset, expected_offset);
            expected_offset += len;
        }
        assert_eq!(expected_offset, TRANSACTION_TRYTES);
    }

    #[test]
    fn nonce_sits_at_the_end_of_the_last_block() {
        assert_eq!(NONCE_OFFSET_IN_LAST_BLOCK, 162);
        assert_eq!(NONCE_OFFSET_IN_LAST_BLOCK + NONCE_TRITS, HASH_LENGTH);
    }

    #[test]
    fn max_timestamp_is_largest_27_trit_value() {
        assert_eq!(MAX_TIMESTAMP_VALUE, (3i64.pow(27) - 1) / 2);
    }

    #[test]
    fn missing_and_garbage_numbers_become_zero() {
        assert_eq!(parse_or_zero("MIN_DEPTH", None), 0);
        assert_eq!(parse_or_zero("MIN_DEPTH", Some("")), 0);
        assert_eq!(parse_or_zero("MIN_DEPTH", Some("three")), 0);
        assert_eq!(parse_or_zero("MIN_DEPTH", Some("-4")), 0);
        assert_eq!(parse_or_zero("MIN_DEPTH", Some(" 3 ")), 3);
    }

    #[test]
    fn resolve_keeps_explicit_values() {
        let config = RelayConfig::resolve(RawRelaySettings {
            provider: Some("http://localhost:14265".into()),
            min_depth: Some("3".into()),
            min_weight_magnitude: Some("14".into()),
            deadline_ms: 1500,
            error_sink_url: Some("http://sink.local/report".into()),
        });

        assert_eq!(config.provider, "http://localhost:14265");
        assert_eq!(config.min_depth, 3);
        assert_eq!(config.min_weight_magnitude, 14);
        assert_eq!(config.deadline, Duration::from_millis(1500));
        assert_eq!(config.error_sink_url.as_deref(), Some("http://sink.local/report"));
    }

    #[test]
    fn resolve_fills_in_provider_and_clamps_mwm() {
        let config = RelayConfig::resolve(RawRelaySettings {
            provider: Some("   ".into()),
            min_weight_magnitude: Some("999".into()),
            error_sink_url: Some(String::new()),
            ..RawRelaySettings::default()
        });

        assert!(KNOWN_PROVIDERS.contains(&config.provider.as_str()));
        assert_eq!(config.min_depth, 0);
        assert_eq!(config.min_weight_magnitude, MAX_MIN_WEIGHT_MAGNITUDE);
        assert_eq!(config.error_sink_url, None);
    }

    #[test]
    fn provider_pick_is_from_known_set() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert!(KNOWN_PROVIDERS.contains(&pick_provider(&mut rng)));
        }
    }
}
