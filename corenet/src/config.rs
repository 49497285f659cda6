//! Configuration surface (spec §6), loaded the way `flux::logging::terminal` loads its
//! `LoggerConfig` today — a plain `serde`-deserializable struct consumed via `serdeconv`, not a
//! bespoke parser. The runtime only *consumes* a [`Config`]; building one from CLI args or a file
//! is an application concern, per the Non-goal on CLI tooling.

use crate::error::{Error, Kind, Result};
use crate::ids::{ClientId, StringId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// The role an endpoint plays in a session (spec §6 `role`). `Host` and `Client` both produce a
/// client-role endpoint; `Host` additionally sets `requestAsHost` on the admission handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Server,
    Client,
    Host,
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub role: Role,
    pub server_addr: String,
    pub tcp_port: u16,
    pub udp_port: u16,

    pub max_clients: u32,
    pub whitelist: Option<HashSet<IpAddr>>,

    pub host_addr: Option<String>,
    pub migratable: bool,
    pub shutdown_when_empty: bool,

    pub connection_request_rate_millis: u64,
    pub connection_request_limit: u32,
    pub connection_request_timeout_millis: u64,

    pub buffer_size: usize,

    pub protocol_version: u16,
    pub min_protocol_version: u16,
    pub app_version: u16,
    pub min_app_version: u16,

    pub app_id: String,
    pub session_id: String,

    pub measure_bandwidth: bool,
    pub use_compression: bool,

    pub threaded: bool,
    pub thread_update_delta_millis: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            role: Role::Server,
            server_addr: "127.0.0.1".into(),
            tcp_port: 8000,
            udp_port: 9000,
            max_clients: 4,
            whitelist: None,
            host_addr: None,
            migratable: false,
            shutdown_when_empty: true,
            connection_request_rate_millis: 5000,
            connection_request_limit: 10,
            connection_request_timeout_millis: 20_000,
            buffer_size: 2048,
            protocol_version: 1,
            min_protocol_version: 1,
            app_version: 1,
            min_app_version: 1,
            app_id: String::new(),
            session_id: String::new(),
            measure_bandwidth: false,
            use_compression: true,
            threaded: true,
            thread_update_delta_millis: 40,
        }
    }
}

impl Config {
    /// Parses a TOML document the same way `flux::logging::terminal` assembles its
    /// `sloggers::LoggerConfig` — via `serdeconv`, never a hand-rolled parser.
    pub fn from_toml_str(text: &str) -> Result<Config> {
        serdeconv::from_toml_str(text).map_err(|_| Error::fatal(Kind::InvalidValue))
    }

    pub fn app_id(&self) -> Result<StringId> {
        StringId::new(self.app_id.clone())
    }

    pub fn session_id(&self) -> Result<StringId> {
        StringId::new(self.session_id.clone())
    }

    /// Relay role with `shutdownWhenEmpty = false` forces `migratable = true` (spec §4.5.3).
    pub fn effective_migratable(&self) -> bool {
        if !self.shutdown_when_empty {
            true
        } else {
            self.migratable
        }
    }

    #[inline]
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.server_addr, self.tcp_port)
    }

    #[inline]
    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.server_addr, self.udp_port)
    }

    #[inline]
    pub fn requests_host(&self) -> bool {
        matches!(self.role, Role::Host)
    }
}

/// A just-admitted client's authority, as decided by the server/relay role (spec §4.5.1,
/// §4.5.3). Returned alongside [`crate::rpc::ClientIdAssignment`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AuthorityDecision {
    pub authority_id: ClientId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.tcp_port, 8000);
        assert_eq!(config.udp_port, 9000);
        assert_eq!(config.max_clients, 4);
        assert!(!config.migratable);
        assert!(config.shutdown_when_empty);
        assert_eq!(config.connection_request_rate_millis, 5000);
        assert_eq!(config.connection_request_limit, 10);
        assert_eq!(config.connection_request_timeout_millis, 20_000);
        assert_eq!(config.buffer_size, 2048);
        assert!(config.use_compression);
        assert!(config.threaded);
        assert_eq!(config.thread_update_delta_millis, 40);
    }

    #[test]
    fn shutdown_when_empty_false_forces_migratable() {
        let mut config = Config { shutdown_when_empty: false, migratable: false, ..Config::default() };
        assert!(config.effective_migratable());
        config.shutdown_when_empty = true;
        assert!(!config.effective_migratable());
    }

    #[test]
    fn parses_from_toml() {
        let toml = r#"
            role = "Relay"
            tcp_port = 8100
            app_id = "APP"
            session_id = "S1"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.role, Role::Relay);
        assert_eq!(config.tcp_port, 8100);
        assert_eq!(config.app_id, "APP");
    }
}
