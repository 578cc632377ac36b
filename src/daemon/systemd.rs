use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::daemon::unit::{service_file_name, UnitDescriptor};
use crate::daemon::SYSTEMD_UNIT_DIR;
use crate::system::executor::{probe_command, run_command};

/// Check if systemd is available on this system
pub fn has_systemd() -> bool {
    Path::new("/run/systemd/system").exists()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// The host service manager, seen only through the operations we need.
#[async_trait]
pub trait SupervisionFacility: Send + Sync {
    /// Store the descriptor in the facility's configuration directory
    async fn register(&self, unit: &UnitDescriptor) -> Result<WriteOutcome>;

    /// Remove a stored descriptor. Returns false if there was none.
    async fn unregister(&self, unit: &str) -> Result<bool>;

    async fn is_registered(&self, unit: &str) -> bool;

    /// Re-read the configuration index (daemon-reload)
    async fn reload(&self) -> Result<()>;

    async fn enable(&self, unit: &str) -> Result<()>;

    async fn disable(&self, unit: &str) -> Result<()>;

    async fn start(&self, unit: &str) -> Result<()>;

    async fn restart(&self, unit: &str) -> Result<()>;

    /// Waits for the stop job to finish
    async fn stop(&self, unit: &str) -> Result<()>;

    /// Queues a stop job and returns without waiting for the unit to go down
    async fn request_stop(&self, unit: &str) -> Result<()>;

    async fn is_active(&self, unit: &str) -> bool;

    async fn is_enabled(&self, unit: &str) -> bool;
}

/// systemd driven through `systemctl`, unit files under `unit_dir`.
pub struct Systemctl {
    unit_dir: PathBuf,
}

impl Systemctl {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEMD_UNIT_DIR)
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(service_file_name(unit))
    }

    async fn systemctl(&self, action: &str, unit: &str) -> Result<()> {
        self.systemctl_job(action, unit, false).await
    }

    async fn systemctl_job(&self, action: &str, unit: &str, no_block: bool) -> Result<()> {
        let service = service_file_name(unit);
        run_command("systemctl", &job_args(action, &service, no_block)).await?;
        debug!("systemctl {} {} ok", action, service);
        Ok(())
    }
}

fn job_args<'a>(action: &'a str, service: &'a str, no_block: bool) -> Vec<&'a str> {
    let mut args = vec![action];
    if no_block {
        args.push("--no-block");
    }
    args.push(service);
    args
}

#[async_trait]
impl SupervisionFacility for Systemctl {
    async fn register(&self, unit: &UnitDescriptor) -> Result<WriteOutcome> {
        let path = self.unit_path(&unit.name);
        let content = unit.render();

        // Check if unit file already exists and is identical
        let outcome = match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
            Ok(_) => WriteOutcome::Updated,
            Err(_) => WriteOutcome::Created,
        };

        tokio::fs::write(&path, &content)
            .await
            .with_context(|| format!("Failed to write unit file {:?}", path))?;
        info!("Unit file written: {:?} ({:?})", path, outcome);
        Ok(outcome)
    }

    async fn unregister(&self, unit: &str) -> Result<bool> {
        let path = self.unit_path(unit);
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove unit file {:?}", path))?;
        Ok(true)
    }

    async fn is_registered(&self, unit: &str) -> bool {
        self.unit_path(unit).exists()
    }

    async fn reload(&self) -> Result<()> {
        run_command("systemctl", &["daemon-reload"]).await?;
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.systemctl("enable", unit).await
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        self.systemctl("disable", unit).await
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.systemctl("start", unit).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.systemctl("restart", unit).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.systemctl("stop", unit).await
    }

    async fn request_stop(&self, unit: &str) -> Result<()> {
        self.systemctl_job("stop", unit, true).await
    }

    async fn is_active(&self, unit: &str) -> bool {
        probe_command("systemctl", &["is-active", "--quiet", &service_file_name(unit)]).await
    }

    async fn is_enabled(&self, unit: &str) -> bool {
        probe_command("systemctl", &["is-enabled", "--quiet", &service_file_name(unit)]).await
    }
}
