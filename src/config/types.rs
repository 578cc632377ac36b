//! Supervisor configuration structs and defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workload: WorkloadSettings,
    pub maintenance: MaintenanceSettings,
    pub supervisor: SupervisorSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputRouting {
    /// Captured by the host journal
    Journal,
    /// Discarded
    Null,
}

impl OutputRouting {
    pub fn as_systemd(&self) -> &'static str {
        match self {
            OutputRouting::Journal => "journal",
            OutputRouting::Null => "null",
        }
    }
}

/// systemd `Restart=` values the units may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_systemd(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub unit_name: String,
    pub description: String,
    /// Entry point relative to the installation directory
    pub entry_point: String,
    pub args: Vec<String>,
    pub restart_delay_secs: u64,
    pub output: OutputRouting,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            unit_name: "detection".to_string(),
            description: "Detection workload".to_string(),
            entry_point: "run_detection.sh".to_string(),
            args: Vec::new(),
            restart_delay_secs: 30,
            output: OutputRouting::Journal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub unit_name: String,
    pub description: String,
    pub script_name: String,
    pub dwell_secs: u64,
    pub grace_secs: u64,
    pub restart_delay_secs: u64,
    /// `on-failure` keeps a deliberately stopped scheduler down
    pub restart: RestartPolicy,
    /// Poll the workload unit during the grace period and reboot early once it is inactive
    pub confirm_stop: bool,
    /// Keep the next reboot time across unrelated reboots
    pub persist_schedule: bool,
    pub schedule_file: String,
    pub output: OutputRouting,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            unit_name: "detection-maintenance".to_string(),
            description: "Detection maintenance reboot scheduler".to_string(),
            script_name: "maintenance.sh".to_string(),
            dwell_secs: 24 * 60 * 60,
            grace_secs: 5,
            restart_delay_secs: 30,
            restart: RestartPolicy::Always,
            confirm_stop: false,
            persist_schedule: false,
            schedule_file: "/var/lib/detection-supervisor/schedule.json".to_string(),
            output: OutputRouting::Journal,
        }
    }
}

/// In-process restart policy used by `--supervise`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub stop_timeout_secs: u64,
    pub backoff: Option<BackoffSettings>,
    pub circuit_breaker: Option<BreakerSettings>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
            backoff: None,
            circuit_breaker: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    pub multiplier: f64,
    pub max_delay_secs: u64,
    /// A run at least this long resets the delay to its base value
    pub stable_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub max_restarts: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub wired: Option<InterfaceSettings>,
    pub wireless: Option<InterfaceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSettings {
    /// Kernel interface name, e.g. eth0 / wlan0
    pub interface: String,
    /// NetworkManager connection profile name
    pub connection: String,
    /// Static address in CIDR form; None keeps DHCP
    #[serde(default)]
    pub address: Option<String>,
    pub gateway: String,
    /// Route metric; wired 100, wireless 600 when unset
    #[serde(default)]
    pub metric: Option<u32>,
    /// Policy routing table; wired 100, wireless 200 when unset
    #[serde(default)]
    pub table: Option<u32>,
    #[serde(default)]
    pub rule_priority: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}
