//! Protocol names, versions, and server limits.

/// Protocol name a client must send in `startSession`.
pub const PROTOCOL_NAME: &str = "PURCMC";
/// Current protocol version the server speaks.
pub const PROTOCOL_VERSION: u32 = 100;
/// Oldest protocol version the server still accepts.
pub const PROTOCOL_MIN_VERSION: u32 = 100;

/// Default Unix-socket path.
pub const DEF_US_PATH: &str = "/var/tmp/purcrdr.sock";
/// Default directory a client binds its own address under.
pub const DEF_CLI_PATH: &str = "/var/tmp/";
/// Default WebSocket port.
pub const DEF_WS_PORT: u16 = 7702;
/// Reserved WebSocket port (e.g. for a secure variant).
pub const RESERVED_WS_PORT: u16 = 7703;

/// Maximum accepted (but not yet authenticated or registered) clients per
/// listener.
pub const MAX_CLIENTS_EACH: usize = 128;
/// An `AUTHING` endpoint older than this (seconds) since `t_created` is
/// reaped.
pub const MAX_NO_RESPONDING_TIME_SECS: u64 = 90;
/// A `READY` endpoint older than this (seconds) since its last `t_living`
/// update is sent a `PING`.
pub const MAX_PING_TIME_SECS: u64 = 60;
/// Per-client outbound buffer cap, in bytes, before the connection is
/// marked `CLOSING`.
pub const SOCK_THROTTLE_THLD: usize = 1024 * 1024;

/// Poll timeout for the server's readiness loop, in milliseconds.
pub const POLL_TIMEOUT_MS: u64 = 500;
/// How often (seconds) the dangling-endpoint reaper runs.
pub const REAP_DANGLING_INTERVAL_SECS: u64 = 5;
/// How often (seconds) the no-responding scan runs.
pub const CHECK_NO_RESPONDING_INTERVAL_SECS: u64 = 10;

/// Default client request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
