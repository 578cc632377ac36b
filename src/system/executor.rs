//! Subprocess executor for the host tools we drive (systemctl, nmcli, ip).

use anyhow::{anyhow, Context, Result};
use tracing::{debug, trace};

/// Build a Command for `program` with `args`, stdin detached.
pub fn build_command<I, S>(program: &str, args: I) -> std::process::Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = std::process::Command::new(program);
    cmd.args(args);
    cmd.stdin(std::process::Stdio::null());
    cmd
}

/// Run `program args...` and return its stdout. A non-zero exit is an error
/// carrying the tool's stderr.
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let cmd = build_command(program, args);

    debug!("Executing: {} {}", program, args.join(" "));

    let output = tokio::process::Command::from(cmd)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{} {} failed ({}): {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    trace!("{} output: {}", program, stdout.trim());
    Ok(stdout)
}

/// Run `program args...` and report only whether it exited successfully.
/// Spawn failures count as "no".
pub async fn probe_command(program: &str, args: &[&str]) -> bool {
    let cmd = build_command(program, args);

    tokio::process::Command::from(cmd)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_command_returns_stdout() {
        let out = run_command("sh", &["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_command_reports_stderr_on_failure() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn probe_command_handles_missing_program() {
        assert!(!probe_command("definitely-not-a-real-binary-xyz", &[]).await);
        assert!(probe_command("true", &[]).await);
    }
}
