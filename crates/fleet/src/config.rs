//! Layered configuration.
//!
//! Values come from three places, highest precedence first: command-line
//! arguments (or their `FLEET_*` environment fallbacks), the optional TOML
//! file, and built-in defaults. Each section holds only what was set; the
//! `*_config` methods fill the gaps and build the runtime config types.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use fleet_grpc::{AgentConfig, CoordinatorConfig, CoordinatorHostConfig, PushSchedule};

use crate::cli::{AgentArgs, CoordinatorArgs};
use crate::error::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_PUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_COORDINATOR_URL: &str = "http://127.0.0.1:50051";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub coordinator: CoordinatorSection,
    pub agent: AgentSection,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub coordinator_id: Option<String>,
    pub push_interval_secs: Option<u64>,
    pub wall_clock_push: Option<bool>,
    pub push_write_timeout_ms: Option<u64>,
    pub outbound_buffer: Option<usize>,
}

impl From<CoordinatorArgs> for CoordinatorSection {
    fn from(args: CoordinatorArgs) -> Self {
        Self {
            bind: args.bind,
            port: args.port,
            coordinator_id: args.coordinator_id,
            push_interval_secs: args.push_interval_secs,
            // An absent flag means "not set here", not "false".
            wall_clock_push: args.wall_clock_push.then_some(true),
            push_write_timeout_ms: args.push_write_timeout_ms,
            outbound_buffer: args.outbound_buffer,
        }
    }
}

impl CoordinatorSection {
    /// Values set in `over` replace ours.
    pub fn overlay(self, over: Self) -> Self {
        Self {
            bind: over.bind.or(self.bind),
            port: over.port.or(self.port),
            coordinator_id: over.coordinator_id.or(self.coordinator_id),
            push_interval_secs: over.push_interval_secs.or(self.push_interval_secs),
            wall_clock_push: over.wall_clock_push.or(self.wall_clock_push),
            push_write_timeout_ms: over.push_write_timeout_ms.or(self.push_write_timeout_ms),
            outbound_buffer: over.outbound_buffer.or(self.outbound_buffer),
        }
    }

    pub fn host_config(&self) -> Result<CoordinatorHostConfig, Error> {
        let bind = self.bind.as_deref().unwrap_or(DEFAULT_BIND);
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {bind:?}: {e}")))?;
        let bind_addr = SocketAddr::new(ip, self.port.unwrap_or(DEFAULT_PORT));

        let mut coordinator = CoordinatorConfig::default();
        if let Some(id) = &self.coordinator_id {
            coordinator.coordinator_id.clone_from(id);
        }
        let period_secs = self.push_interval_secs.unwrap_or(DEFAULT_PUSH_INTERVAL_SECS);
        coordinator.push_schedule = if self.wall_clock_push.unwrap_or(false) {
            PushSchedule::WallClockAligned { period_secs }
        } else {
            PushSchedule::Every(Duration::from_secs(period_secs))
        };
        if let Some(ms) = self.push_write_timeout_ms {
            coordinator.push_write_timeout = Duration::from_millis(ms);
        }
        if let Some(outbound_buffer) = self.outbound_buffer {
            coordinator.outbound_buffer = outbound_buffer;
        }
        coordinator.validate()?;

        Ok(CoordinatorHostConfig {
            bind_addr,
            coordinator,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub coordinator: Option<String>,
    pub id: Option<String>,
    pub tick_interval_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl From<AgentArgs> for AgentSection {
    fn from(args: AgentArgs) -> Self {
        Self {
            coordinator: args.coordinator,
            id: args.id,
            tick_interval_secs: args.tick_interval_secs,
            reconnect_initial_ms: args.reconnect_initial_ms,
            reconnect_max_secs: args.reconnect_max_secs,
            max_attempts: args.max_attempts,
        }
    }
}

impl AgentSection {
    /// Values set in `over` replace ours.
    pub fn overlay(self, over: Self) -> Self {
        Self {
            coordinator: over.coordinator.or(self.coordinator),
            id: over.id.or(self.id),
            tick_interval_secs: over.tick_interval_secs.or(self.tick_interval_secs),
            reconnect_initial_ms: over.reconnect_initial_ms.or(self.reconnect_initial_ms),
            reconnect_max_secs: over.reconnect_max_secs.or(self.reconnect_max_secs),
            max_attempts: over.max_attempts.or(self.max_attempts),
        }
    }

    pub fn agent_config(&self) -> Result<AgentConfig, Error> {
        let agent_id = self
            .id
            .clone()
            .unwrap_or_else(AgentConfig::generated_agent_id);
        let url = self
            .coordinator
            .as_deref()
            .unwrap_or(DEFAULT_COORDINATOR_URL);

        let mut config = AgentConfig::new(agent_id, url);
        if let Some(secs) = self.tick_interval_secs {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.reconnect_initial_ms {
            config.reconnect.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = self.reconnect_max_secs {
            config.reconnect.max_backoff = Duration::from_secs(secs);
        }
        config.reconnect.max_attempts = self.max_attempts;

        if config.reconnect.initial_backoff > config.reconnect.max_backoff {
            return Err(Error::Config(format!(
                "reconnect initial backoff {:?} exceeds the maximum {:?}",
                config.reconnect.initial_backoff, config.reconnect.max_backoff
            )));
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let config = FleetConfig::default();

        let host = config.coordinator.host_config().unwrap();
        assert_eq!(host.bind_addr, "127.0.0.1:50051".parse::<SocketAddr>().unwrap());
        assert_eq!(host.coordinator.coordinator_id, "coordinator");
        assert_eq!(
            host.coordinator.push_schedule,
            PushSchedule::Every(Duration::from_secs(30))
        );

        let agent = config.agent.agent_config().unwrap();
        assert!(agent.agent_id.starts_with("agent-"));
        assert_eq!(agent.coordinator_url, DEFAULT_COORDINATOR_URL);
        assert_eq!(agent.tick_interval, Duration::from_secs(10));
        assert_eq!(agent.reconnect.max_attempts, None);
    }

    #[test]
    fn loads_both_tables_from_file() {
        let file = write_config(
            r#"
[coordinator]
port = 7000
coordinator_id = "hub"
push_interval_secs = 60
wall_clock_push = true

[agent]
coordinator = "http://hub.internal:7000"
id = "edge-7"
tick_interval_secs = 5
max_attempts = 4
"#,
        );

        let config = FleetConfig::load(file.path()).unwrap();

        let host = config.coordinator.host_config().unwrap();
        assert_eq!(host.bind_addr.port(), 7000);
        assert_eq!(host.coordinator.coordinator_id, "hub");
        assert_eq!(
            host.coordinator.push_schedule,
            PushSchedule::WallClockAligned { period_secs: 60 }
        );

        let agent = config.agent.agent_config().unwrap();
        assert_eq!(agent.agent_id, "edge-7");
        assert_eq!(agent.coordinator_url, "http://hub.internal:7000");
        assert_eq!(agent.tick_interval, Duration::from_secs(5));
        assert_eq!(agent.reconnect.max_attempts, Some(4));
    }

    #[test]
    fn flags_override_file_values() {
        let file = write_config(
            r#"
[coordinator]
bind = "0.0.0.0"
port = 7000
push_interval_secs = 60
"#,
        );
        let config = FleetConfig::load(file.path()).unwrap();

        let flags = CoordinatorArgs {
            port: Some(7100),
            ..CoordinatorArgs::default()
        };
        let host = config
            .coordinator
            .overlay(flags.into())
            .host_config()
            .unwrap();

        assert_eq!(host.bind_addr, "0.0.0.0:7100".parse::<SocketAddr>().unwrap());
        assert_eq!(
            host.coordinator.push_schedule,
            PushSchedule::Every(Duration::from_secs(60))
        );
    }

    #[test]
    fn unset_wall_clock_flag_keeps_file_value() {
        let section = CoordinatorSection {
            wall_clock_push: Some(true),
            ..CoordinatorSection::default()
        };
        let merged = section.overlay(CoordinatorArgs::default().into());
        assert_eq!(merged.wall_clock_push, Some(true));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[coordinator]\nprot = 7000\n");
        let err = FleetConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FleetConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_bind = CoordinatorSection {
            bind: Some("not-an-ip".into()),
            ..CoordinatorSection::default()
        };
        assert!(matches!(bad_bind.host_config(), Err(Error::Config(_))));

        let zero_interval = CoordinatorSection {
            push_interval_secs: Some(0),
            ..CoordinatorSection::default()
        };
        assert!(matches!(zero_interval.host_config(), Err(Error::Grpc(_))));

        let inverted_backoff = AgentSection {
            reconnect_initial_ms: Some(60_000),
            reconnect_max_secs: Some(1),
            ..AgentSection::default()
        };
        assert!(matches!(
            inverted_backoff.agent_config(),
            Err(Error::Config(_))
        ));

        let bad_url = AgentSection {
            coordinator: Some("not a url".into()),
            ..AgentSection::default()
        };
        assert!(matches!(bad_url.agent_config(), Err(Error::Grpc(_))));
    }
}
