use anyhow::{Context, Result};
use oxport_collector::network::ProbeSettings;
use oxport_collector::puppet::DEFAULT_LAST_RUN_REPORT_PATH;
use oxport_common::types::{InventoryPolicy, ProcessFilter, Target};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8200;

/// Collector configuration. Every section is optional and disabled unless
/// `enabled = true`.
#[derive(Debug, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub file_hash: FileHashConfig,
    #[serde(default)]
    pub port: PortConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub puppet: PuppetConfig,
    #[serde(default)]
    pub hetzner: CloudConfig,
    #[serde(default)]
    pub hetzner_cloud: CloudConfig,
    #[serde(default)]
    pub yandex_cloud: CloudConfig,
    #[serde(default)]
    pub aws: CloudConfig,
}

#[derive(Debug, Deserialize)]
pub struct FileHashConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_file_hash_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_port_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout_secs: u64,
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout_secs: u64,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_process_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub processes: Vec<ProcessFilter>,
}

#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_system_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct PuppetConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_puppet_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_last_run_report_path")]
    pub last_run_report_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cloud_interval")]
    pub interval_secs: u64,
    /// Sleep a random 1-60s before the first poll.
    #[serde(default)]
    pub random_sleep_before_start: bool,
    /// Falls back to the provider's default when unset.
    #[serde(default)]
    pub inventory_policy: Option<InventoryPolicy>,
}

fn default_file_hash_interval() -> u64 {
    180
}

fn default_port_interval() -> u64 {
    60
}

fn default_tcp_timeout() -> u64 {
    5
}

fn default_udp_timeout() -> u64 {
    2
}

fn default_process_interval() -> u64 {
    15
}

fn default_system_interval() -> u64 {
    60
}

fn default_puppet_interval() -> u64 {
    300
}

fn default_last_run_report_path() -> PathBuf {
    PathBuf::from(DEFAULT_LAST_RUN_REPORT_PATH)
}

fn default_cloud_interval() -> u64 {
    600
}

impl Default for FileHashConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_file_hash_interval(),
            files: Vec::new(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_port_interval(),
            tcp_timeout_secs: default_tcp_timeout(),
            udp_timeout_secs: default_udp_timeout(),
            targets: Vec::new(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_process_interval(),
            processes: Vec::new(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_system_interval(),
        }
    }
}

impl Default for PuppetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_puppet_interval(),
            last_run_report_path: default_last_run_report_path(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_cloud_interval(),
            random_sleep_before_start: false,
            inventory_policy: None,
        }
    }
}

impl PortConfig {
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            tcp_timeout: Duration::from_secs(self.tcp_timeout_secs),
            udp_timeout: Duration::from_secs(self.udp_timeout_secs),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file {path}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("file_hash", self.file_hash.enabled, self.file_hash.interval_secs),
            ("port", self.port.enabled, self.port.interval_secs),
            ("process", self.process.enabled, self.process.interval_secs),
            ("system", self.system.enabled, self.system.interval_secs),
            ("puppet", self.puppet.enabled, self.puppet.interval_secs),
            ("hetzner", self.hetzner.enabled, self.hetzner.interval_secs),
            ("hetzner_cloud", self.hetzner_cloud.enabled, self.hetzner_cloud.interval_secs),
            ("yandex_cloud", self.yandex_cloud.enabled, self.yandex_cloud.interval_secs),
            ("aws", self.aws.enabled, self.aws.interval_secs),
        ];
        for (section, enabled, interval_secs) in intervals {
            if enabled && interval_secs == 0 {
                anyhow::bail!("[{section}] interval_secs must be greater than 0");
            }
        }
        if self.port.enabled && (self.port.tcp_timeout_secs == 0 || self.port.udp_timeout_secs == 0) {
            anyhow::bail!("[port] probe timeouts must be greater than 0");
        }
        Ok(())
    }
}

/// Config path from the first CLI argument, else `CONFIG`, else the default.
pub fn resolve_config_path(cli_arg: Option<String>, env_value: Option<String>) -> String {
    cli_arg
        .filter(|p| !p.is_empty())
        .or_else(|| env_value.filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Listen address from `HOST`/`PORT` values.
pub fn listen_addr(host: Option<String>, port: Option<String>) -> Result<String> {
    let host = host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match port.filter(|p| !p.is_empty()) {
        Some(p) => p
            .parse::<u16>()
            .with_context(|| format!("Invalid PORT value: {p}"))?,
        None => DEFAULT_PORT,
    };
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxport_common::types::Protocol;

    #[test]
    fn empty_config_should_disable_everything() {
        let config = AgentConfig::parse("").unwrap();
        assert!(!config.port.enabled);
        assert!(!config.aws.enabled);
        assert_eq!(config.port.interval_secs, 60);
        assert_eq!(config.process.interval_secs, 15);
        assert_eq!(config.yandex_cloud.interval_secs, 600);
        assert_eq!(
            config.puppet.last_run_report_path,
            PathBuf::from(DEFAULT_LAST_RUN_REPORT_PATH)
        );
    }

    #[test]
    fn sections_should_parse_targets_and_filters() {
        let config = AgentConfig::parse(
            r#"
[port]
enabled = true
tcp_timeout_secs = 3

[[port.targets]]
host = "db.internal"
port = 5432
protocol = "TCP"

[[port.targets]]
host = "ntp.internal"
port = 123
protocol = "udp"

[process]
enabled = true

[[process.processes]]
process = "nginx"
regex = "^nginx"

[yandex_cloud]
enabled = true
random_sleep_before_start = true
inventory_policy = "prune_absent"
"#,
        )
        .unwrap();

        assert_eq!(config.port.targets.len(), 2);
        assert_eq!(config.port.targets[1].protocol, Protocol::Udp);
        assert_eq!(config.port.probe_settings().tcp_timeout, Duration::from_secs(3));
        assert_eq!(config.port.probe_settings().udp_timeout, Duration::from_secs(2));
        assert_eq!(config.process.processes[0].regex, "^nginx");
        assert!(config.yandex_cloud.random_sleep_before_start);
        assert_eq!(
            config.yandex_cloud.inventory_policy,
            Some(InventoryPolicy::PruneAbsent)
        );
    }

    #[test]
    fn zero_interval_should_be_rejected_for_enabled_sections() {
        assert!(AgentConfig::parse("[system]\nenabled = true\ninterval_secs = 0\n").is_err());
        assert!(AgentConfig::parse("[system]\nenabled = false\ninterval_secs = 0\n").is_ok());
    }

    #[test]
    fn unknown_policy_should_fail_to_parse() {
        assert!(AgentConfig::parse("[aws]\ninventory_policy = \"sometimes\"\n").is_err());
    }

    #[test]
    fn resolve_config_path_should_prefer_cli_then_env() {
        assert_eq!(
            resolve_config_path(Some("a.toml".into()), Some("b.toml".into())),
            "a.toml"
        );
        assert_eq!(resolve_config_path(None, Some("b.toml".into())), "b.toml");
        assert_eq!(resolve_config_path(None, Some(String::new())), DEFAULT_CONFIG_PATH);
    }

    #[test]
    fn listen_addr_should_default_and_validate() {
        assert_eq!(listen_addr(None, None).unwrap(), "127.0.0.1:8200");
        assert_eq!(
            listen_addr(Some("0.0.0.0".into()), Some("9100".into())).unwrap(),
            "0.0.0.0:9100"
        );
        assert!(listen_addr(None, Some("http".into())).is_err());
    }
}
