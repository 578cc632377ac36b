//! Command-line argument definitions (clap) and help text.

use clap::Parser;
use std::path::PathBuf;

pub const HELP_TEXT: &str = "
Detection Supervisor
Usage: detection-supervisor [OPTIONS]

Options:
  -h, --help                    Print help
  -V, --version                 Print version
Install:
  -I, --install                 Install, enable and start the workload and maintenance units
      --user <USER>             Identity the workload runs as (default: $SUDO_USER or root)
      --workdir <DIR>           Installation directory (default: this executable's directory)
  -U, --uninstall               Stop, disable and remove both units
Run:
      --supervise               Run the workload in the foreground, restarting it after every exit
      --maintenance             Run the maintenance scheduler (used by the generated maintenance.sh)
      --dwell-secs <SECS>       Override the maintenance dwell interval
      --grace-secs <SECS>       Override the grace period between stop and reboot
      --workload-unit <UNIT>    Override the unit the maintenance scheduler stops
Network:
  -N, --configure-network       Apply wired/wireless routing from the config file
Status & Config:
  -i, --status                  Show unit status
  -c, --config                  Show current configuration
      --init-config             Write the current configuration to the config file
      --config-file <PATH>      Config file (default: config.json next to the executable)
      --log-level <LOG_LEVEL>   Log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
";

#[derive(Parser, Debug)]
#[command(name = "detection-supervisor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detection workload supervisor and maintenance scheduler", long_about = None)]
pub struct Args {
    // === Install ===
    /// Install, enable and start the workload and maintenance units
    #[arg(short = 'I', long, help_heading = "Install")]
    pub install: bool,

    /// Identity the workload runs as (default: $SUDO_USER or root)
    #[arg(long, help_heading = "Install")]
    pub user: Option<String>,

    /// Installation directory (default: this executable's directory)
    #[arg(long, help_heading = "Install")]
    pub workdir: Option<PathBuf>,

    /// Stop, disable and remove both units
    #[arg(short = 'U', long, help_heading = "Install")]
    pub uninstall: bool,

    // === Run ===
    /// Run the workload in the foreground, restarting it after every exit
    #[arg(long, help_heading = "Run")]
    pub supervise: bool,

    /// Run the maintenance scheduler
    #[arg(long, help_heading = "Run")]
    pub maintenance: bool,

    /// Override the maintenance dwell interval
    #[arg(long = "dwell-secs", help_heading = "Run")]
    pub dwell_secs: Option<u64>,

    /// Override the grace period between stop and reboot
    #[arg(long = "grace-secs", help_heading = "Run")]
    pub grace_secs: Option<u64>,

    /// Override the unit the maintenance scheduler stops
    #[arg(long = "workload-unit", help_heading = "Run")]
    pub workload_unit: Option<String>,

    // === Network ===
    /// Apply wired/wireless routing from the config file
    #[arg(short = 'N', long = "configure-network", help_heading = "Network")]
    pub configure_network: bool,

    // === Status & Config ===
    /// Show unit status
    #[arg(short = 'i', long, help_heading = "Status & Config")]
    pub status: bool,

    /// Show current configuration
    #[arg(short = 'c', long, help_heading = "Status & Config")]
    pub config: bool,

    /// Write the current configuration to the config file
    #[arg(long = "init-config", help_heading = "Status & Config")]
    pub init_config: bool,

    /// Config file (default: config.json next to the executable)
    #[arg(long = "config-file", help_heading = "Status & Config")]
    pub config_file: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long = "log-level", help_heading = "Status & Config")]
    pub log_level: Option<String>,
}

impl Args {
    pub fn has_command(&self) -> bool {
        self.install
            || self.uninstall
            || self.supervise
            || self.maintenance
            || self.configure_network
            || self.status
            || self.config
            || self.init_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generated_maintenance_invocation() {
        let args = Args::try_parse_from([
            "detection-supervisor",
            "--maintenance",
            "--dwell-secs",
            "86400",
            "--grace-secs",
            "5",
            "--workload-unit",
            "detection",
            "--config-file",
            "/opt/detect/config.json",
        ])
        .unwrap();

        assert!(args.maintenance);
        assert_eq!(args.dwell_secs, Some(86_400));
        assert_eq!(args.grace_secs, Some(5));
        assert_eq!(args.workload_unit.as_deref(), Some("detection"));
        assert_eq!(args.config_file, Some(PathBuf::from("/opt/detect/config.json")));
        assert!(args.has_command());
    }

    #[test]
    fn bare_invocation_has_no_command() {
        let args = Args::try_parse_from(["detection-supervisor"]).unwrap();
        assert!(!args.has_command());
    }

    #[test]
    fn install_accepts_user_and_workdir() {
        let args =
            Args::try_parse_from(["detection-supervisor", "-I", "--user", "pi", "--workdir", "/srv"])
                .unwrap();
        assert!(args.install);
        assert_eq!(args.user.as_deref(), Some("pi"));
        assert_eq!(args.workdir, Some(PathBuf::from("/srv")));
    }
}
