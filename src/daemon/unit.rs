//! Unit descriptors and their systemd rendering.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::types::{OutputRouting, RestartPolicy};

/// One service definition handed to the supervision facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub name: String,
    pub description: String,
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub run_as: String,
    pub restart: RestartPolicy,
    pub restart_delay: Duration,
    pub output: OutputRouting,
}

impl UnitDescriptor {
    pub fn exec_start(&self) -> String {
        let mut line = quote_arg(&self.exec.to_string_lossy());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let output = self.output.as_systemd();

        // Writing to a String cannot fail
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description={}", self.description);
        let _ = writeln!(out, "After=network-online.target");
        let _ = writeln!(out, "Wants=network-online.target");
        let _ = writeln!(out);
        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "Type=simple");
        let _ = writeln!(out, "User={}", self.run_as);
        let _ = writeln!(out, "WorkingDirectory={}", self.working_directory.display());
        let _ = writeln!(out, "ExecStart={}", self.exec_start());
        let _ = writeln!(out, "Restart={}", self.restart.as_systemd());
        let _ = writeln!(out, "RestartSec={}", self.restart_delay.as_secs());
        let _ = writeln!(out, "StandardOutput={}", output);
        let _ = writeln!(out, "StandardError={}", output);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=multi-user.target");
        out
    }
}

pub fn service_file_name(unit: &str) -> String {
    if unit.ends_with(".service") {
        unit.to_string()
    } else {
        format!("{}.service", unit)
    }
}

/// systemd splits ExecStart on whitespace; quote anything that would break.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
