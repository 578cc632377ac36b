//! Launching and terminating the detection workload process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::types::OutputRouting;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    /// Terminated by a signal
    Killed,
    LaunchFailed(String),
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitOutcome::Exited(code),
            None => ExitOutcome::Killed,
        }
    }
}

#[async_trait]
pub trait Workload: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn WorkloadProcess>>;
}

#[async_trait]
pub trait WorkloadProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Resolves when the process exits on its own
    async fn wait(&mut self) -> Result<ExitOutcome>;

    /// SIGTERM, then SIGKILL once `timeout` passes
    async fn terminate(&mut self, timeout: Duration) -> Result<ExitOutcome>;
}

/// The workload as an external executable.
pub struct CommandWorkload {
    program: PathBuf,
    args: Vec<String>,
    working_directory: PathBuf,
    output: OutputRouting,
}

impl CommandWorkload {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        working_directory: PathBuf,
        output: OutputRouting,
    ) -> Self {
        Self {
            program,
            args,
            working_directory,
            output,
        }
    }
}

#[async_trait]
impl Workload for CommandWorkload {
    async fn launch(&self) -> Result<Box<dyn WorkloadProcess>> {
        let (stdout, stderr) = match self.output {
            OutputRouting::Journal => (Stdio::inherit(), Stdio::inherit()),
            OutputRouting::Null => (Stdio::null(), Stdio::null()),
        };

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        // Own process group, so a wrapper script's children go down with it
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to launch {:?}", self.program))?;

        debug!("Launched {:?} (PID: {:?})", self.program, child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl WorkloadProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(status.into())
    }

    async fn terminate(&mut self, timeout: Duration) -> Result<ExitOutcome> {
        let group = self.child.id();
        signal_group(group, Signal::Term);

        let outcome = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status?.into(),
            Err(_) => {
                warn!("Workload did not exit within {:?}, force killing", timeout);
                signal_group(group, Signal::Kill);
                // Already exited under the group kill is fine
                let _ = self.child.start_kill();
                self.child.wait().await?.into()
            }
        };

        // The leader is gone; take down anything it left behind
        signal_group(group, Signal::Kill);
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Signal every process in the group led by `leader`.
fn signal_group(leader: Option<u32>, signal: Signal) {
    #[cfg(target_os = "linux")]
    if let Some(pid) = leader {
        let signal = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // ESRCH just means the group is already empty
        unsafe { libc::kill(-(pid as i32), signal) };
    }

    #[cfg(not(target_os = "linux"))]
    let _ = (leader, signal);
}
