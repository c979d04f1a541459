use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::filter::FilterEngine;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments of the gateway binary.
///
/// The configuration file is positional; the two addresses can be overridden
/// from the command line or the environment, which wins over the file.
///
/// # Command Line
/// `gangway config.toml --listen 0.0.0.0:2222 --admin 127.0.0.1:8088`
#[derive(Parser, Debug, Clone)]
#[command(name = "gangway")]
#[command(version)]
#[command(about = "Auditing terminal gateway")]
pub struct Args {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Address users connect to (overrides `[gateway] listen_address`)
    #[arg(long, env = "GANGWAY_LISTEN")]
    pub listen: Option<String>,

    /// Admin API address; setting it also enables the API
    #[arg(long, env = "GANGWAY_ADMIN")]
    pub admin: Option<String>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// Deserialized from TOML; every section and field has a default so a file
/// only needs to name what differs.
///
/// # Sections
/// - `gateway`: where users connect
/// - `target`: the downstream target each session is bridged to
/// - `session`: idle timeout, keepalive and terminal geometry
/// - `recording`: replay directory, upload retries and command batching
/// - `storage`: replay and command backends (`file` or `null`)
/// - `admin`: the HTTP admin API
/// - `filter`: command policy rules
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use gangway::configuration::Config;
///
/// let config = Config::from_file(Path::new("gangway.toml")).unwrap();
/// println!("Listening on: {}", config.gateway.listen_address);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub target: TargetConfig,
    pub session: SessionConfig,
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
    pub admin: AdminConfig,
    pub filter: FilterConfig,
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line and environment overrides, then re-validates.
    pub fn apply_args(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(listen) = &args.listen {
            self.gateway.listen_address = listen.clone();
        }
        if let Some(admin) = &args.admin {
            self.admin.bind_address = admin.clone();
            self.admin.enabled = true;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_address(&self.gateway.listen_address)?;
        parse_address(&self.target.address)?;
        if self.admin.enabled {
            parse_address(&self.admin.bind_address)?;
        }
        if self.session.max_idle_minutes < 1 {
            return Err(ConfigError::NotInRange(format!(
                "session.max_idle_minutes must be at least 1, got {}",
                self.session.max_idle_minutes
            )));
        }
        if self.session.keepalive_secs < 1 || self.session.idle_check_secs < 1 {
            return Err(ConfigError::NotInRange(
                "session.keepalive_secs and session.idle_check_secs must be at least 1".to_string(),
            ));
        }
        if self.recording.command_batch_size < 1 {
            return Err(ConfigError::NotInRange(
                "recording.command_batch_size must be at least 1".to_string(),
            ));
        }
        // compile once so a broken pattern fails at startup, not per session
        FilterEngine::new(self.filter.rules.clone())?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_address(&self.gateway.listen_address)
    }

    pub fn admin_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_address(&self.admin.bind_address)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.session.max_idle_minutes * 60)
    }
}

fn parse_address(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse::<SocketAddr>()
        .map_err(|e| ConfigError::BadAddress(format!("{}: {}", addr, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{RuleAction, RuleKind};
    use serial_test::serial;
    use std::io::Write;

    const SAMPLE: &str = r#"
[gateway]
listen_address = "0.0.0.0:2222"

[target]
name = "web-01"
address = "10.0.0.5:22"
protocol = "ssh"
account = "deploy"

[session]
max_idle_minutes = 15

[storage]
replay = "null"

[[filter.rules]]
priority = 1
kind = "exact"
patterns = ["rm -rf /"]
action = "deny"

[[filter.rules]]
priority = 10
kind = "regex"
patterns = ["^sudo "]
action = "allow"
high_risk = true
"#;

    #[test]
    fn test_from_toml_with_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.gateway.listen_address, "0.0.0.0:2222");
        assert_eq!(config.target.protocol, Protocol::Ssh);
        assert_eq!(config.target.org_id, "default");
        assert_eq!(config.max_idle(), Duration::from_secs(15 * 60));
        assert_eq!(config.session.keepalive_secs, 60);
        assert_eq!(config.recording.command_batch_size, 5);
        assert_eq!(config.storage.replay, StorageKind::Null);
        assert_eq!(config.storage.command, StorageKind::File);
        assert_eq!(config.filter.rules.len(), 2);
        assert_eq!(config.filter.rules[0].kind, RuleKind::Exact);
        assert_eq!(config.filter.rules[0].action, RuleAction::Deny);
        assert!(config.filter.rules[1].high_risk);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.target.name, "web-01");
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/gangway.toml")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let err = Config::from_toml("[gateway]\nlisten_address = \"nowhere\"").unwrap_err();
        assert!(matches!(err, ConfigError::BadAddress(_)));

        let err = Config::from_toml("[session]\nmax_idle_minutes = 0").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let err = Config::from_toml("[recording]\ncommand_batch_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let bad_rule = "[[filter.rules]]\npriority = 1\nkind = \"regex\"\npatterns = [\"(\"]\naction = \"deny\"";
        assert!(matches!(Config::from_toml(bad_rule).unwrap_err(), ConfigError::InvalidRule(_)));

        assert!(matches!(Config::from_toml("[target]\nprotocol = \"ftp\"").unwrap_err(), ConfigError::TomlError(_)));
    }

    #[test]
    #[serial]
    fn test_args_override_file() {
        std::env::remove_var("GANGWAY_LISTEN");
        std::env::remove_var("GANGWAY_ADMIN");
        let args = Args::try_parse_from(["gangway", "gangway.toml", "--listen", "127.0.0.1:4000", "--admin", "127.0.0.1:9000"]).unwrap();
        assert_eq!(args.config_file, PathBuf::from("gangway.toml"));

        let mut config = Config::default();
        config.apply_args(&args).unwrap();
        assert_eq!(config.gateway.listen_address, "127.0.0.1:4000");
        assert!(config.admin.enabled);
        assert_eq!(config.admin_addr().unwrap().port(), 9000);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("GANGWAY_LISTEN", "127.0.0.1:5000");
        let args = Args::try_parse_from(["gangway", "gangway.toml"]);
        std::env::remove_var("GANGWAY_LISTEN");
        let args = args.unwrap();
        assert_eq!(args.listen.as_deref(), Some("127.0.0.1:5000"));
        assert!(args.admin.is_none());

        let mut config = Config::default();
        config.apply_args(&args).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 5000);
        assert!(!config.admin.enabled);
    }
}
