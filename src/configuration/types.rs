use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::filter::FilterRule;

/// Protocol spoken with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
    K8s,
    Mysql,
    Mariadb,
    Postgresql,
    Sqlserver,
    Oracle,
}

impl Protocol {
    pub fn is_database(self) -> bool {
        matches!(
            self,
            Protocol::Mysql | Protocol::Mariadb | Protocol::Postgresql | Protocol::Sqlserver | Protocol::Oracle
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Telnet => "telnet",
            Protocol::K8s => "k8s",
            Protocol::Mysql => "mysql",
            Protocol::Mariadb => "mariadb",
            Protocol::Postgresql => "postgresql",
            Protocol::Sqlserver => "sqlserver",
            Protocol::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let p = match s.to_ascii_lowercase().as_str() {
            "ssh" => Protocol::Ssh,
            "telnet" => Protocol::Telnet,
            "k8s" => Protocol::K8s,
            "mysql" => Protocol::Mysql,
            "mariadb" => Protocol::Mariadb,
            "postgresql" => Protocol::Postgresql,
            "sqlserver" => Protocol::Sqlserver,
            "oracle" => Protocol::Oracle,
            other => return Err(format!("unknown protocol {:?}", other)),
        };
        Ok(p)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:2222".to_string(),
        }
    }
}

/// The single downstream target every gateway session is bridged to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub name: String,
    pub address: String,
    pub protocol: Protocol,
    pub account: String,
    pub org_id: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            address: "127.0.0.1:23".to_string(),
            protocol: Protocol::Telnet,
            account: "root".to_string(),
            org_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_idle_minutes: u64,
    pub keepalive_secs: u64,
    pub idle_check_secs: u64,
    pub term: String,
    pub width: u16,
    pub height: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_idle_minutes: 30,
            keepalive_secs: 60,
            idle_check_secs: 30,
            term: "xterm".to_string(),
            width: 80,
            height: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub replay_dir: String,
    pub upload_retries: u32,
    pub retry_backoff_ms: u64,
    pub command_batch_size: usize,
    pub command_flush_secs: u64,
    pub command_max_failures: u32,
    pub input_limit: usize,
    pub output_limit: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            replay_dir: "data/replays".to_string(),
            upload_retries: 3,
            retry_backoff_ms: 1000,
            command_batch_size: 5,
            command_flush_secs: 10,
            command_max_failures: 5,
            input_limit: 128,
            output_limit: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    File,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub replay: StorageKind,
    pub replay_path: String,
    /// Second replay destination, tried once after the primary gave up.
    pub fallback_path: Option<String>,
    pub command: StorageKind,
    pub command_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            replay: StorageKind::File,
            replay_path: "data/storage".to_string(),
            fallback_path: None,
            command: StorageKind::File,
            command_path: "data/storage".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8088".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub rules: Vec<FilterRule>,
}
