//! Provisioning of the workload and maintenance units (idempotent).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::types::{AppConfig, RestartPolicy};
use crate::daemon::systemd::{SupervisionFacility, WriteOutcome};
use crate::daemon::unit::UnitDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFailureKind {
    /// Writing the descriptor failed
    Provisioning,
    /// The facility rejected enable/start/restart
    Activation(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub kind: UnitFailureKind,
    pub message: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UnitFailureKind::Provisioning => {
                write!(f, "{}: failed to write unit descriptor: {}", self.unit, self.message)
            }
            UnitFailureKind::Activation(action) => {
                write!(f, "{}: {} rejected: {}", self.unit, action, self.message)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Root privileges required. Run with: sudo ./detection-supervisor --install")]
    NotPrivileged,

    #[error("Installation directory not found: {0}")]
    MissingWorkingDirectory(PathBuf),

    #[error("Workload entry point not found: {0}")]
    MissingEntryPoint(PathBuf),

    #[error("Run-as identity must not be empty")]
    InvalidIdentity,

    #[error("Failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to reload the service manager: {0}")]
    Reload(String),

    #[error("{}", join_failures(.0))]
    Units(Vec<UnitFailure>),
}

impl InstallError {
    /// Raised before anything on the host was touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            InstallError::NotPrivileged
                | InstallError::MissingWorkingDirectory(_)
                | InstallError::MissingEntryPoint(_)
                | InstallError::InvalidIdentity
        )
    }
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub script: Option<WriteOutcome>,
    pub units: Vec<(String, WriteOutcome)>,
    pub activated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Binary the maintenance launcher execs
    pub supervisor_exe: PathBuf,
    /// Config file the maintenance launcher passes along, if any
    pub config_path: Option<PathBuf>,
    pub elevated: bool,
}

pub struct Installer {
    facility: Arc<dyn SupervisionFacility>,
    config: AppConfig,
    options: InstallOptions,
}

impl Installer {
    pub fn new(
        facility: Arc<dyn SupervisionFacility>,
        config: AppConfig,
        options: InstallOptions,
    ) -> Self {
        Self {
            facility,
            config,
            options,
        }
    }

    pub fn entry_point(&self, working_directory: &Path) -> PathBuf {
        working_directory.join(&self.config.workload.entry_point)
    }

    pub fn script_path(&self, working_directory: &Path) -> PathBuf {
        working_directory.join(&self.config.maintenance.script_name)
    }

    pub fn workload_unit(&self, working_directory: &Path, run_as: &str) -> UnitDescriptor {
        let workload = &self.config.workload;
        UnitDescriptor {
            name: workload.unit_name.clone(),
            description: workload.description.clone(),
            exec: self.entry_point(working_directory),
            args: workload.args.clone(),
            working_directory: working_directory.to_path_buf(),
            run_as: run_as.to_string(),
            restart: RestartPolicy::Always,
            restart_delay: Duration::from_secs(workload.restart_delay_secs),
            output: workload.output,
        }
    }

    /// Runs as root: stopping units and rebooting need it.
    pub fn maintenance_unit(&self, working_directory: &Path) -> UnitDescriptor {
        let maintenance = &self.config.maintenance;
        UnitDescriptor {
            name: maintenance.unit_name.clone(),
            description: maintenance.description.clone(),
            exec: self.script_path(working_directory),
            args: vec![],
            working_directory: working_directory.to_path_buf(),
            run_as: "root".to_string(),
            restart: maintenance.restart,
            restart_delay: Duration::from_secs(maintenance.restart_delay_secs),
            output: maintenance.output,
        }
    }

    /// Body of the generated maintenance launcher.
    pub fn maintenance_script(&self) -> String {
        let maintenance = &self.config.maintenance;
        let mut exec = format!(
            "exec {} --maintenance --dwell-secs {} --grace-secs {} --workload-unit {}",
            shell_quote(&self.options.supervisor_exe.to_string_lossy()),
            maintenance.dwell_secs,
            maintenance.grace_secs,
            shell_quote(&self.config.workload.unit_name),
        );
        if let Some(config_path) = &self.options.config_path {
            exec.push_str(" --config-file ");
            exec.push_str(&shell_quote(&config_path.to_string_lossy()));
        }

        format!(
            "#!/bin/sh\n\
             # Generated by detection-supervisor --install; re-run the installer to change it.\n\
             # Waits {}s, stops {}, waits {}s, reboots.\n\
             {}\n",
            maintenance.dwell_secs,
            self.config.workload.unit_name,
            maintenance.grace_secs,
            exec
        )
    }

    pub async fn install(
        &self,
        working_directory: &Path,
        run_as: &str,
    ) -> Result<InstallReport, InstallError> {
        // Preconditions: nothing below this block may run if any fails
        if !self.options.elevated {
            return Err(InstallError::NotPrivileged);
        }
        if run_as.trim().is_empty() {
            return Err(InstallError::InvalidIdentity);
        }
        // Unit files and the launcher need absolute paths
        let resolved = std::fs::canonicalize(working_directory)
            .map_err(|_| InstallError::MissingWorkingDirectory(working_directory.to_path_buf()))?;
        let working_directory = resolved.as_path();
        let entry_point = self.entry_point(working_directory);
        if !entry_point.is_file() {
            return Err(InstallError::MissingEntryPoint(entry_point));
        }

        let mut report = InstallReport::default();

        // 1. Workload entry point executable
        make_executable(&entry_point).map_err(|source| InstallError::Prepare {
            path: entry_point.clone(),
            source,
        })?;
        debug!("Marked executable: {:?}", entry_point);

        // 2. Maintenance launcher
        let script_path = self.script_path(working_directory);
        let outcome = write_if_changed(&script_path, &self.maintenance_script())
            .and_then(|outcome| make_executable(&script_path).map(|_| outcome))
            .map_err(|source| InstallError::Prepare {
                path: script_path.clone(),
                source,
            })?;
        info!("Maintenance script {:?}: {:?}", script_path, outcome);
        report.script = Some(outcome);

        // 3. Descriptors, each independent of the other
        let units = [
            self.workload_unit(working_directory, run_as),
            self.maintenance_unit(working_directory),
        ];
        let mut failures = Vec::new();
        let mut registered = Vec::new();
        for unit in &units {
            match self.facility.register(unit).await {
                Ok(outcome) => {
                    info!("Unit {}: {:?}", unit.name, outcome);
                    report.units.push((unit.name.clone(), outcome));
                    registered.push(unit.name.clone());
                }
                Err(e) => {
                    warn!("Unit {} not written: {:#}", unit.name, e);
                    failures.push(UnitFailure {
                        unit: unit.name.clone(),
                        kind: UnitFailureKind::Provisioning,
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        // 4. Reload the index so the new descriptors are seen
        if !registered.is_empty() {
            self.facility
                .reload()
                .await
                .map_err(|e| InstallError::Reload(format!("{:#}", e)))?;
        }

        // 5 + 6. Enable, then start or restart
        for unit in &registered {
            if let Err(e) = self.facility.enable(unit).await {
                failures.push(activation_failure(unit, "enable", e));
                continue;
            }

            let (action, result) = if self.facility.is_active(unit).await {
                ("restart", self.facility.restart(unit).await)
            } else {
                ("start", self.facility.start(unit).await)
            };
            match result {
                Ok(()) => {
                    info!("Unit {} enabled and {}ed", unit, action);
                    report.activated.push(unit.clone());
                }
                Err(e) => failures.push(activation_failure(unit, action, e)),
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(InstallError::Units(failures))
        }
    }

    /// Stop, disable and remove both units and the generated launcher.
    pub async fn uninstall(&self, working_directory: &Path) -> Result<(), InstallError> {
        if !self.options.elevated {
            return Err(InstallError::NotPrivileged);
        }

        let units = [
            self.config.maintenance.unit_name.clone(),
            self.config.workload.unit_name.clone(),
        ];
        let mut failures = Vec::new();
        for unit in &units {
            if !self.facility.is_registered(unit).await {
                info!("Unit {} is not installed", unit);
                continue;
            }
            if let Err(e) = self.facility.stop(unit).await {
                warn!("Failed to stop {}: {:#}", unit, e);
            }
            if let Err(e) = self.facility.disable(unit).await {
                warn!("Failed to disable {}: {:#}", unit, e);
            }
            if let Err(e) = self.facility.unregister(unit).await {
                failures.push(UnitFailure {
                    unit: unit.clone(),
                    kind: UnitFailureKind::Provisioning,
                    message: format!("{:#}", e),
                });
            }
        }

        let script_path = self.script_path(working_directory);
        if script_path.exists() {
            std::fs::remove_file(&script_path).map_err(|source| InstallError::Prepare {
                path: script_path.clone(),
                source,
            })?;
            info!("Removed {:?}", script_path);
        }

        self.facility
            .reload()
            .await
            .map_err(|e| InstallError::Reload(format!("{:#}", e)))?;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(InstallError::Units(failures))
        }
    }
}

fn activation_failure(unit: &str, action: &'static str, e: anyhow::Error) -> UnitFailure {
    warn!("{} {} failed: {:#}", action, unit, e);
    UnitFailure {
        unit: unit.to_string(),
        kind: UnitFailureKind::Activation(action),
        message: format!("{:#}", e),
    }
}

fn write_if_changed(path: &Path, content: &str) -> std::io::Result<WriteOutcome> {
    let outcome = match std::fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
        Ok(_) => WriteOutcome::Updated,
        Err(_) => WriteOutcome::Created,
    };
    std::fs::write(path, content)?;
    Ok(outcome)
}

fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = std::fs::metadata(path)?.permissions();
        let mode = perms.mode();
        if mode & 0o755 != 0o755 {
            perms.set_mode(mode | 0o755);
            std::fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
