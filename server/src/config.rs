//! Server configuration: CLI flags (`clap`) overlaying a TOML file, split
//! into a section per concern (`[listener]`, `[limits]`,
//! `[housekeeping]`). Every knob defaults to its matching constant; the
//! config layer just makes them overridable.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use purcrdr_protocol::constants::{
    CHECK_NO_RESPONDING_INTERVAL_SECS, DEF_CLI_PATH, DEF_US_PATH, DEF_WS_PORT, MAX_CLIENTS_EACH,
    MAX_NO_RESPONDING_TIME_SECS, MAX_PING_TIME_SECS, REAP_DANGLING_INTERVAL_SECS,
    SOCK_THROTTLE_THLD,
};

use crate::error::{Result, ServerError};

#[derive(Parser, Debug)]
#[command(name = "purcrdrd")]
#[command(about = "PurCRDR renderer server")]
#[command(version)]
pub struct Args {
    /// Path to a TOML configuration file; CLI flags below override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Unix-socket path to listen on.
    #[arg(long)]
    pub us_path: Option<PathBuf>,

    /// WebSocket port to listen on; omit to disable the WS listener.
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit structured JSON log lines instead of human-readable ones.
    #[arg(long)]
    pub json_logs: bool,
}

/// `[listener]`: where the server accepts connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub us_path: PathBuf,
    pub ws_port: Option<u16>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            us_path: PathBuf::from(DEF_US_PATH),
            ws_port: Some(DEF_WS_PORT),
        }
    }
}

/// `[limits]`: resource ceilings on accepted connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_clients_each: usize,
    pub sock_throttle_thld: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients_each: MAX_CLIENTS_EACH,
            sock_throttle_thld: SOCK_THROTTLE_THLD,
        }
    }
}

/// `[housekeeping]`: the periodic reaper/ping-idle/evict cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub max_no_responding_time_secs: u64,
    pub max_ping_time_secs: u64,
    pub reap_dangling_interval_secs: u64,
    pub check_no_responding_interval_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            max_no_responding_time_secs: MAX_NO_RESPONDING_TIME_SECS,
            max_ping_time_secs: MAX_PING_TIME_SECS,
            reap_dangling_interval_secs: REAP_DANGLING_INTERVAL_SECS,
            check_no_responding_interval_secs: CHECK_NO_RESPONDING_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub limits: LimitsConfig,
    pub housekeeping: HousekeepingConfig,
    /// Directory a connecting client's own address is expected under;
    /// informational on the server side, kept here so a single config
    /// file can describe the whole deployment.
    pub cli_path: PathBuf,
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ServerError::Config(format!("{path:?}: {e}")))
    }

    /// Build the effective config: start from a loaded file (if any),
    /// then apply CLI overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default_with_cli_path(),
        };
        if let Some(us_path) = &args.us_path {
            cfg.listener.us_path = us_path.clone();
        }
        if let Some(ws_port) = args.ws_port {
            cfg.listener.ws_port = Some(ws_port);
        }
        Ok(cfg)
    }

    fn default_with_cli_path() -> Self {
        Self {
            cli_path: PathBuf::from(DEF_CLI_PATH),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.limits.max_clients_each, MAX_CLIENTS_EACH);
        assert_eq!(cfg.housekeeping.max_no_responding_time_secs, MAX_NO_RESPONDING_TIME_SECS);
    }

    #[test]
    fn toml_round_trips() {
        let cfg = ServerConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.limits.max_clients_each, cfg.limits.max_clients_each);
    }
}
