//! Endpoint naming, token validation, and unique id generation.
//!
//! Pure functions plus a process-global monotonic counter and a
//! `CLOCK_REALTIME`-equivalent sampler. No I/O, no async, no panics on
//! malformed input: every validator returns a bool, every assembler
//! returns the written length (zero on overflow).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Maximum length of a host token.
pub const MAX_LEN_HOST_NAME: usize = 127;
/// Maximum length of an app name (dot-separated tokens).
pub const MAX_LEN_APP_NAME: usize = 127;
/// Maximum length of a runner token.
pub const MAX_LEN_RUNNER_NAME: usize = 63;
/// Maximum length of a fully assembled endpoint name `@host/app/runner`.
pub const MAX_LEN_ENDPOINT_NAME: usize = 321;
/// Maximum length of a generated unique id.
pub const MAX_LEN_UNIQUE_ID: usize = 63;

/// Character used to pad a unique-id prefix shorter than 8 bytes.
const UNIQUE_ID_PAD_CHAR: u8 = b'X';
/// Width, in bytes, of the uppercased prefix field of a unique id.
const UNIQUE_ID_PREFIX_WIDTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdsError {
    #[error("token exceeds maximum length {max}")]
    TooLong { max: usize },
    #[error("token is empty or malformed")]
    Malformed,
}

/// `true` when `s` is a valid token: starts with an ASCII letter, continues
/// with alphanumerics or underscores, and is no longer than `max_len`.
pub fn is_valid_token(s: &str, max_len: usize) -> bool {
    if s.is_empty() || s.len() > max_len {
        return false;
    }
    let mut chars = s.bytes();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    s.bytes().skip(1).all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `true` when `s` is a valid dot-separated app name: every dot-segment is a
/// valid token, and the whole string is no longer than [`MAX_LEN_APP_NAME`].
pub fn is_valid_app_name(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_LEN_APP_NAME {
        return false;
    }
    s.split('.').all(|seg| is_valid_token(seg, MAX_LEN_APP_NAME))
}

/// `true` when `h`, `a`, `r` are independently valid host/app/runner tokens.
pub fn is_valid_endpoint_components(host: &str, app: &str, runner: &str) -> bool {
    is_valid_token(host, MAX_LEN_HOST_NAME)
        && is_valid_app_name(app)
        && is_valid_token(runner, MAX_LEN_RUNNER_NAME)
}

/// Parse `@host/app/runner` into its three components. Returns `None` on any
/// malformed input (wrong shape, invalid tokens, or length overflow).
pub fn parse_endpoint_name(endpoint: &str) -> Option<(&str, &str, &str)> {
    let rest = endpoint.strip_prefix('@')?;
    let mut parts = rest.splitn(3, '/');
    let host = parts.next()?;
    let app = parts.next()?;
    let runner = parts.next()?;
    if !is_valid_endpoint_components(host, app, runner) {
        return None;
    }
    if endpoint.len() > MAX_LEN_ENDPOINT_NAME {
        return None;
    }
    Some((host, app, runner))
}

/// Extract just the host component, or `""` on malformed input.
pub fn extract_host_name(endpoint: &str) -> &str {
    parse_endpoint_name(endpoint).map(|(h, _, _)| h).unwrap_or("")
}

/// Extract just the app component, or `""` on malformed input.
pub fn extract_app_name(endpoint: &str) -> &str {
    parse_endpoint_name(endpoint).map(|(_, a, _)| a).unwrap_or("")
}

/// Extract just the runner component, or `""` on malformed input.
pub fn extract_runner_name(endpoint: &str) -> &str {
    parse_endpoint_name(endpoint).map(|(_, _, r)| r).unwrap_or("")
}

/// Join `host`, `app`, `runner` into `@host/app/runner`.
///
/// Returns the written length, or `0` if the components are invalid or the
/// assembled name would exceed [`MAX_LEN_ENDPOINT_NAME`].
pub fn assemble_endpoint_name(host: &str, app: &str, runner: &str) -> (String, usize) {
    if !is_valid_endpoint_components(host, app, runner) {
        return (String::new(), 0);
    }
    let assembled = format!("@{host}/{app}/{runner}");
    if assembled.len() > MAX_LEN_ENDPOINT_NAME {
        return (String::new(), 0);
    }
    let len = assembled.len();
    (assembled, len)
}

/// A validated, owned endpoint name. Construction goes through
/// [`EndpointName::parse`] or [`EndpointName::assemble`] so nothing
/// downstream re-validates raw strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointName(String);

impl EndpointName {
    pub fn parse(raw: &str) -> Result<Self, IdsError> {
        if parse_endpoint_name(raw).is_none() {
            return Err(IdsError::Malformed);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn assemble(host: &str, app: &str, runner: &str) -> Result<Self, IdsError> {
        let (assembled, len) = assemble_endpoint_name(host, app, runner);
        if len == 0 {
            return Err(IdsError::TooLong {
                max: MAX_LEN_ENDPOINT_NAME,
            });
        }
        Ok(Self(assembled))
    }

    pub fn host(&self) -> &str {
        extract_host_name(&self.0)
    }

    pub fn app(&self) -> &str {
        extract_app_name(&self.0)
    }

    pub fn runner(&self) -> &str {
        extract_runner_name(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EndpointName {
    type Err = IdsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// ASCII-lowercase a string into a freshly allocated copy, truncated at
/// `max_len` bytes (the C original writes into a bounded buffer; here the
/// bound just caps the copy).
pub fn name_tolower_copy(s: &str, max_len: usize) -> String {
    s.bytes().take(max_len).map(|b| b.to_ascii_lowercase() as char).collect()
}

/// ASCII-uppercase a string into a freshly allocated copy, truncated at
/// `max_len` bytes.
pub fn name_toupper_copy(s: &str, max_len: usize) -> String {
    s.bytes().take(max_len).map(|b| b.to_ascii_uppercase() as char).collect()
}

static UNIQUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sampler for the monotonically increasing parts of a unique id, and for
/// `t_living`/`t_created` timestamps elsewhere in the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        Self
    }

    /// `(seconds, nanoseconds)` since the Unix epoch, standing in for
    /// `CLOCK_REALTIME`.
    pub fn realtime_parts(&self) -> (u64, u64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now.as_secs(), now.subsec_nanos() as u64)
    }

    /// Next value of the process-local counter; wraps naturally on overflow.
    pub fn next_counter(&self) -> u64 {
        UNIQUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    }
}

/// `PPPPPPPP-TTTTTTTTTTTTTTTT-NNNNNNNNNNNNNNNN-CCCCCCCCCCCCCCCC`
///
/// `prefix` is upper-cased and padded to 8 bytes with `X`, truncated if
/// longer. The two 16-hex-digit fields are `CLOCK_REALTIME` seconds and
/// nanoseconds; the third is the process-local counter. Total length is
/// always 59 bytes, within [`MAX_LEN_UNIQUE_ID`].
pub fn generate_unique_id(prefix: &str) -> String {
    generate_unique_id_with(prefix, &MonotonicClock::new())
}

/// Testable variant of [`generate_unique_id`] that takes an explicit clock.
pub fn generate_unique_id_with(prefix: &str, clock: &MonotonicClock) -> String {
    let mut p = [UNIQUE_ID_PAD_CHAR; UNIQUE_ID_PREFIX_WIDTH];
    for (slot, b) in p.iter_mut().zip(prefix.bytes().take(UNIQUE_ID_PREFIX_WIDTH)) {
        *slot = b.to_ascii_uppercase();
    }
    let prefix_field = std::str::from_utf8(&p).expect("ascii only");

    let (secs, nanos) = clock.realtime_parts();
    let counter = clock.next_counter();

    format!("{prefix_field}-{secs:016x}-{nanos:016x}-{counter:016x}")
}

/// Generate an id from raw MD5 bytes, rendered as 32 lowercase hex chars:
/// an alternative unique-id form keyed off caller-supplied data rather
/// than the clock.
pub fn generate_md5_id(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(data);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tokens() {
        assert!(is_valid_token("abc123", 127));
        assert!(is_valid_token("a_b_c", 127));
        assert!(!is_valid_token("1abc", 127));
        assert!(!is_valid_token("", 127));
        assert!(!is_valid_token(&"a".repeat(128), 127));
        assert!(is_valid_token(&"a".repeat(127), 127));
    }

    #[test]
    fn app_name_dot_segments() {
        assert!(is_valid_app_name("cn.fmsoft.test"));
        assert!(!is_valid_app_name("cn..test"));
        assert!(!is_valid_app_name(".leading"));
    }

    #[test]
    fn endpoint_round_trip() {
        let (assembled, len) = assemble_endpoint_name("localhost", "cn.fmsoft.test", "t1");
        assert_eq!(assembled, "@localhost/cn.fmsoft.test/t1");
        assert_eq!(len, assembled.len());
        assert_eq!(extract_host_name(&assembled), "localhost");
        assert_eq!(extract_app_name(&assembled), "cn.fmsoft.test");
        assert_eq!(extract_runner_name(&assembled), "t1");
    }

    #[test]
    fn endpoint_name_type_round_trips() {
        let name = EndpointName::assemble("localhost", "cn.fmsoft.test", "t1").unwrap();
        assert_eq!(name.host(), "localhost");
        assert_eq!(name.app(), "cn.fmsoft.test");
        assert_eq!(name.runner(), "t1");
        let reparsed = EndpointName::parse(name.as_str()).unwrap();
        assert_eq!(name, reparsed);
    }

    #[test]
    fn overflow_assembles_to_empty() {
        let long_host = "a".repeat(200);
        let (assembled, len) = assemble_endpoint_name(&long_host, "app", "runner");
        assert_eq!(len, 0);
        assert!(assembled.is_empty());
    }

    #[test]
    fn unique_ids_are_distinct_and_bounded() {
        let clock = MonotonicClock::new();
        let a = generate_unique_id_with("TEST", &clock);
        let b = generate_unique_id_with("TEST", &clock);
        assert_ne!(a, b);
        assert!(a.len() <= MAX_LEN_UNIQUE_ID);
        assert!(a.starts_with("TESTXXXX-"));
    }

    #[test]
    fn md5_id_is_32_hex_chars() {
        let id = generate_md5_id(b"cn.fmsoft.test/t1");
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    proptest::proptest! {
        #[test]
        fn name_round_trip_prop(
            host in "[a-zA-Z][a-zA-Z0-9_]{0,20}",
            app in "[a-zA-Z][a-zA-Z0-9_]{0,10}",
            runner in "[a-zA-Z][a-zA-Z0-9_]{0,10}",
        ) {
            let (assembled, len) = assemble_endpoint_name(&host, &app, &runner);
            prop_assert!(len > 0);
            prop_assert_eq!(extract_host_name(&assembled), host.as_str());
            prop_assert_eq!(extract_app_name(&assembled), app.as_str());
            prop_assert_eq!(extract_runner_name(&assembled), runner.as_str());
        }
    }
}
