//! Host reboot.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use tracing::warn;

use crate::system::executor::run_command;

#[async_trait]
pub trait HostPower: Send + Sync {
    /// Ask the host to reboot. On a real host this does not come back; a
    /// return means the request was accepted but we are still alive.
    async fn reboot(&self) -> Result<()>;
}

pub struct SystemctlPower;

#[async_trait]
impl HostPower for SystemctlPower {
    async fn reboot(&self) -> Result<()> {
        // Flush output streams
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();

        warn!("Rebooting host for scheduled maintenance");
        run_command(
            "systemctl",
            &["reboot", "--message=Scheduled maintenance reboot by detection-supervisor"],
        )
        .await?;
        Ok(())
    }
}
