use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extensions that mark a process name as an executable file rather than a bare name.
const EXECUTABLE_EXTENSIONS: &[&str] = &[".exe", ".com", ".bat", ".cmd"];

/// Top-level configuration loaded from tunnel-watchdog.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatchdogConfig {
    pub watchdog: MonitorConfig,
    pub probe: ProbeConfig,
    pub access: AccessConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub host: String,
    pub watched_processes: Vec<String>,
    pub outage_threshold: u32,
    pub healthy_interval_ms: u64,
    pub unhealthy_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub command: String,
    pub timeout_ms: u64,
}

/// How network access is cut off during an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStrategy {
    /// Toggle a per-process firewall rule.
    Firewall,
    /// Terminate the processes outright; nothing is restored on recovery.
    Kill,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub strategy: AccessStrategy,
    pub iptables: String,
    pub proc_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout_ms: u64,
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            watched_processes: Vec::new(),
            outage_threshold: 3,
            healthy_interval_ms: 5000,
            unhealthy_interval_ms: 1000,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "ping".to_string(),
            timeout_ms: 500,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            strategy: AccessStrategy::Firewall,
            iptables: "iptables".to_string(),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 10_000,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting {field} = {value:?}: {reason}")]
    Invalid {
        field: String,
        value: String,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, value: impl ToString, reason: &'static str) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            value: value.to_string(),
            reason,
        }
    }

    /// The offending field for validation errors.
    #[allow(dead_code)]
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Validated, immutable settings handed to a running watchdog.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub watched_processes: Vec<String>,
    pub outage_threshold: u32,
    pub healthy_interval: Duration,
    pub unhealthy_interval: Duration,
    /// Upper bound on a single probe, already clamped to the shorter poll interval.
    pub probe_timeout: Duration,
    pub probe_command: String,
    pub access: AccessConfig,
    pub drain_timeout: Duration,
}

impl WatchdogConfig {
    /// Read and parse a TOML config file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check every field and build [`Settings`].
    ///
    /// Stops at the first violation; nothing is aggregated.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let w = &self.watchdog;

        if w.host.trim().is_empty() {
            return Err(ConfigError::invalid(
                "watchdog.host",
                &w.host,
                "must be the host or IP address to ping, such as 10.10.10.1",
            ));
        }

        if w.healthy_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "watchdog.healthy_interval_ms",
                w.healthy_interval_ms,
                "must be the number of milliseconds between checks while the host is healthy, such as 5000",
            ));
        }

        if w.unhealthy_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "watchdog.unhealthy_interval_ms",
                w.unhealthy_interval_ms,
                "must be the number of milliseconds between checks while the host is unhealthy, such as 1000",
            ));
        }

        if w.watched_processes.is_empty() {
            return Err(ConfigError::invalid(
                "watchdog.watched_processes",
                "[]",
                "must list the process(es) to cut off when the host is down",
            ));
        }

        for (i, name) in w.watched_processes.iter().enumerate() {
            validate_process_name(i, name)?;
        }

        if w.outage_threshold == 0 {
            return Err(ConfigError::invalid(
                "watchdog.outage_threshold",
                w.outage_threshold,
                "must be the number of consecutive failed checks that make an outage, at least 1",
            ));
        }

        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "probe.timeout_ms",
                self.probe.timeout_ms,
                "must be the number of milliseconds to wait for a ping reply, such as 500",
            ));
        }

        if self.shutdown.drain_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "shutdown.drain_timeout_ms",
                self.shutdown.drain_timeout_ms,
                "must be the number of milliseconds to wait for the loop on shutdown",
            ));
        }

        let healthy_interval = Duration::from_millis(w.healthy_interval_ms);
        let unhealthy_interval = Duration::from_millis(w.unhealthy_interval_ms);
        let probe_timeout = Duration::from_millis(self.probe.timeout_ms)
            .min(healthy_interval)
            .min(unhealthy_interval);

        Ok(Settings {
            host: w.host.trim().to_string(),
            watched_processes: w.watched_processes.clone(),
            outage_threshold: w.outage_threshold,
            healthy_interval,
            unhealthy_interval,
            probe_timeout,
            probe_command: self.probe.command.clone(),
            access: self.access.clone(),
            drain_timeout: Duration::from_millis(self.shutdown.drain_timeout_ms),
        })
    }
}

fn validate_process_name(index: usize, name: &str) -> Result<(), ConfigError> {
    let field = format!("watchdog.watched_processes[{index}]");

    if name.trim().is_empty() {
        return Err(ConfigError::invalid(
            field,
            name,
            "must be the name of a process to cut off, such as firefox",
        ));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ConfigError::invalid(
            field,
            name,
            "must be a bare process name, not a path",
        ));
    }
    let lower = name.to_ascii_lowercase();
    if EXECUTABLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(ConfigError::invalid(
            field,
            name,
            "must not end with an executable extension such as \".exe\"",
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> WatchdogConfig {
    let mut config = WatchdogConfig::default();
    config.watchdog.host = "1.2.3.4".to_string();
    config.watchdog.watched_processes = vec!["calc".to_string()];
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn field_of(config: &WatchdogConfig) -> String {
        config
            .validate()
            .unwrap_err()
            .field()
            .expect("validation error")
            .to_string()
    }

    #[test]
    fn test_defaults() {
        let config = WatchdogConfig::default();
        assert_eq!(config.watchdog.outage_threshold, 3);
        assert_eq!(config.watchdog.healthy_interval_ms, 5000);
        assert_eq!(config.watchdog.unhealthy_interval_ms, 1000);
        assert_eq!(config.probe.command, "ping");
        assert_eq!(config.probe.timeout_ms, 500);
        assert_eq!(config.access.strategy, AccessStrategy::Firewall);
        assert_eq!(config.access.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.shutdown.drain_timeout_ms, 10_000);
    }

    #[test]
    fn test_valid_config_builds_settings() {
        let settings = test_config().validate().unwrap();
        assert_eq!(settings.host, "1.2.3.4");
        assert_eq!(settings.watched_processes, vec!["calc"]);
        assert_eq!(settings.outage_threshold, 3);
        assert_eq!(settings.healthy_interval, Duration::from_millis(5000));
        assert_eq!(settings.unhealthy_interval, Duration::from_millis(1000));
        assert_eq!(settings.probe_timeout, Duration::from_millis(500));
        assert_eq!(settings.drain_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_valid_hosts_and_process_lists() {
        for host in ["1.2.3.4", "google.com"] {
            let mut config = test_config();
            config.watchdog.host = host.to_string();
            assert!(config.validate().is_ok(), "{host} should be valid");
        }
        let mut config = test_config();
        config.watchdog.watched_processes = vec!["calc".to_string(), "notepad".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_host_rejected() {
        for host in ["", " "] {
            let mut config = test_config();
            config.watchdog.host = host.to_string();
            assert_eq!(field_of(&config), "watchdog.host");
        }
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = test_config();
        config.watchdog.healthy_interval_ms = 0;
        assert_eq!(field_of(&config), "watchdog.healthy_interval_ms");

        let mut config = test_config();
        config.watchdog.unhealthy_interval_ms = 0;
        assert_eq!(field_of(&config), "watchdog.unhealthy_interval_ms");
    }

    #[test]
    fn test_empty_process_list_rejected() {
        let mut config = test_config();
        config.watchdog.watched_processes.clear();
        assert_eq!(field_of(&config), "watchdog.watched_processes");
    }

    #[test]
    fn test_bad_process_names_identify_index() {
        let cases: &[(&[&str], &str)] = &[
            (&[""], "watchdog.watched_processes[0]"),
            (&[" "], "watchdog.watched_processes[0]"),
            (&["calc.exe"], "watchdog.watched_processes[0]"),
            (&["calc.exe", "notepad.exe"], "watchdog.watched_processes[0]"),
            (&["calc", "notepad.exe"], "watchdog.watched_processes[1]"),
            (&["calc", "RUN.BAT"], "watchdog.watched_processes[1]"),
            (&["/usr/bin/firefox"], "watchdog.watched_processes[0]"),
        ];
        for (names, expected) in cases {
            let mut config = test_config();
            config.watchdog.watched_processes = names.iter().map(|s| s.to_string()).collect();
            assert_eq!(&field_of(&config), expected, "names: {names:?}");
        }
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = test_config();
        config.watchdog.outage_threshold = 0;
        assert_eq!(field_of(&config), "watchdog.outage_threshold");
    }

    #[test]
    fn test_first_violation_wins() {
        let mut config = test_config();
        config.watchdog.host = String::new();
        config.watchdog.outage_threshold = 0;
        config.watchdog.watched_processes.clear();
        assert_eq!(field_of(&config), "watchdog.host");
    }

    #[test]
    fn test_invalid_error_message_names_field_and_value() {
        let mut config = test_config();
        config.watchdog.healthy_interval_ms = 0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("watchdog.healthy_interval_ms"));
        assert!(msg.contains("\"0\""));
    }

    #[test]
    fn test_probe_timeout_clamped_to_shortest_interval() {
        let mut config = test_config();
        config.watchdog.unhealthy_interval_ms = 200;
        config.probe.timeout_ms = 2000;
        let settings = config.validate().unwrap();
        assert_eq!(settings.probe_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_zero_probe_and_drain_timeouts_rejected() {
        let mut config = test_config();
        config.probe.timeout_ms = 0;
        assert_eq!(field_of(&config), "probe.timeout_ms");

        let mut config = test_config();
        config.shutdown.drain_timeout_ms = 0;
        assert_eq!(field_of(&config), "shutdown.drain_timeout_ms");
    }

    #[test]
    fn test_load_toml_with_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tunnel-watchdog.toml");
        std::fs::write(
            &path,
            r#"
[watchdog]
host = "10.8.0.1"
watched_processes = ["qbittorrent", "transmission"]
outage_threshold = 2

[access]
strategy = "kill"
"#,
        )
        .unwrap();

        let config = WatchdogConfig::load(&path).unwrap();
        assert_eq!(config.watchdog.host, "10.8.0.1");
        assert_eq!(config.watchdog.outage_threshold, 2);
        assert_eq!(config.watchdog.healthy_interval_ms, 5000);
        assert_eq!(config.access.strategy, AccessStrategy::Kill);
        assert_eq!(config.access.iptables, "iptables");
        assert_eq!(config.probe.command, "ping");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = WatchdogConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_unknown_strategy_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[access]\nstrategy = \"unplug\"\n").unwrap();
        let err = WatchdogConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
