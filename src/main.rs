//! detection-supervisor entry point: CLI dispatch, signal handlers, async runtime.

mod app;
mod config;
mod daemon;
mod network;
mod system;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use app::cli::{Args, HELP_TEXT};
use app::logging::{init_tracing, reload_level, startup_filter};
use config::persistence::{exe_dir, load_config, resolve_config_path, save_config};
use config::types::AppConfig;
use daemon::installer::{InstallError, InstallOptions, InstallReport, Installer};
use daemon::maintenance::{MaintenancePlan, MaintenanceScheduler};
use daemon::power::SystemctlPower;
use daemon::schedule::ScheduleStore;
use daemon::status::show_status;
use daemon::supervisor::{RestartPlan, WorkloadSupervisor};
use daemon::systemd::{has_systemd, SupervisionFacility, Systemctl};
use daemon::workload::CommandWorkload;
use network::configurator::NmcliConfigurator;
use network::configure_network;
use system::{default_run_as, is_elevated};

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if err.kind() == clap::error::ErrorKind::DisplayHelp {
                print!("{}", HELP_TEXT);
                std::process::exit(0);
            }
            if err.kind() == clap::error::ErrorKind::DisplayVersion {
                println!("\x1b[32mdetection-supervisor {} ({})\x1b[0m", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH);
                std::process::exit(0);
            }

            eprintln!("{}", err);
            eprintln!();
            print!("{}", HELP_TEXT);
            eprintln!("\nFor more information, try '--help'.");
            std::process::exit(1);
        }
    };

    if !args.has_command() {
        eprintln!("ERROR: No command specified. You must specify a command.");
        eprintln!();
        let _ = Args::command().print_help();
        eprintln!();
        eprintln!("Common commands:");
        eprintln!("  sudo ./detection-supervisor --install   Install and start both units");
        eprintln!("  ./detection-supervisor -i               Show status");
        std::process::exit(1);
    }

    // Priority: 1. --log-level flag, 2. LOG_LEVEL env, 3. config file, 4. info
    let level_override = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok());
    init_tracing(startup_filter(level_override.as_deref()));

    let config_path = resolve_config_path(args.config_file.as_deref())?;
    let config = load_config(Some(&config_path)).await?;
    if level_override.is_none() {
        if let Err(e) = reload_level(&config.logging.log_level) {
            warn!("{}. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL", e);
        }
    }

    if args.config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if args.init_config {
        return save_config(&config, &config_path).await;
    }

    let working_directory = match &args.workdir {
        Some(dir) => dir.clone(),
        None => exe_dir()?,
    };
    let facility: Arc<dyn SupervisionFacility> = Arc::new(Systemctl::system());

    if args.install {
        return run_install(&args, config, &config_path, &working_directory, facility).await;
    }

    if args.uninstall {
        return run_uninstall(config, &working_directory, facility).await;
    }

    if args.status {
        return show_status(facility, &config, &working_directory).await;
    }

    if args.configure_network {
        return run_configure_network(&config).await;
    }

    if args.maintenance {
        return run_maintenance(&args, &config, &config_path, facility).await;
    }

    if args.supervise {
        return run_supervise(&config, &config_path, &working_directory).await;
    }

    Ok(())
}

async fn run_install(
    args: &Args,
    config: AppConfig,
    config_path: &Path,
    working_directory: &Path,
    facility: Arc<dyn SupervisionFacility>,
) -> Result<()> {
    let run_as = args.user.clone().unwrap_or_else(default_run_as);
    let options = InstallOptions {
        supervisor_exe: std::env::current_exe()?,
        config_path: config_path.exists().then(|| config_path.to_path_buf()),
        elevated: is_elevated(),
    };
    let installer = Installer::new(facility, config, options);

    // An unprivileged caller gets the installer's own privilege error first
    if is_elevated() && !has_systemd() {
        eprintln!("ERROR: systemd not detected on this system.");
        eprintln!("   Run the workload in the foreground with: ./detection-supervisor --supervise");
        std::process::exit(1);
    }

    let result = installer.install(working_directory, &run_as).await;
    let code = report_install(&result, &mut std::io::stdout(), &mut std::io::stderr());
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Print the install outcome and return the process exit code.
fn report_install(
    result: &Result<InstallReport, InstallError>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    match result {
        Ok(report) => {
            if let Some(outcome) = report.script {
                let _ = writeln!(out, "✓ Maintenance script: {:?}", outcome);
            }
            for (unit, outcome) in &report.units {
                let _ = writeln!(out, "✓ {}: {:?}", unit, outcome);
            }
            let _ = writeln!(out, "✓ Units enabled and running: {}", report.activated.join(", "));
            let _ = writeln!(out);
            let _ = writeln!(out, "Check with: ./detection-supervisor --status");
            0
        }
        Err(e) => {
            error!("Install failed: {}", e);
            let _ = writeln!(err, "ERROR: {}", e);
            if !e.is_precondition() {
                let _ = writeln!(err, "Re-run the installer after fixing the problem; completed steps are kept.");
            }
            1
        }
    }
}

async fn run_uninstall(
    config: AppConfig,
    working_directory: &Path,
    facility: Arc<dyn SupervisionFacility>,
) -> Result<()> {
    let options = InstallOptions {
        supervisor_exe: std::env::current_exe()?,
        config_path: None,
        elevated: is_elevated(),
    };
    let installer = Installer::new(facility, config, options);

    if let Err(e) = installer.uninstall(working_directory).await {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
    println!("✓ Units stopped, disabled and removed");
    Ok(())
}

async fn run_configure_network(config: &AppConfig) -> Result<()> {
    if !is_elevated() {
        eprintln!("ERROR: Root privileges required. Run with: sudo ./detection-supervisor --configure-network");
        std::process::exit(1);
    }

    match configure_network(&config.network, &NmcliConfigurator).await {
        Ok(outcomes) if outcomes.is_empty() => {
            println!("No interfaces configured under \"network\" in the config file");
            Ok(())
        }
        Ok(outcomes) => {
            for outcome in outcomes {
                match outcome.rule_source {
                    Some(source) => println!("✓ {} ({}): routed from {}", outcome.interface, outcome.role.name(), source),
                    None => println!("⚠ {} ({}): no address yet, policy rule skipped", outcome.interface, outcome.role.name()),
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run_maintenance(
    args: &Args,
    config: &AppConfig,
    config_path: &Path,
    facility: Arc<dyn SupervisionFacility>,
) -> Result<()> {
    let mut settings = config.maintenance.clone();
    if let Some(dwell) = args.dwell_secs {
        settings.dwell_secs = dwell;
    }
    if let Some(grace) = args.grace_secs {
        settings.grace_secs = grace;
    }
    let unit = args
        .workload_unit
        .clone()
        .unwrap_or_else(|| config.workload.unit_name.clone());

    info!("Maintenance scheduler v{} starting", env!("CARGO_PKG_VERSION"));
    let plan = MaintenancePlan::from_settings(&settings, &unit);
    let mut scheduler = MaintenanceScheduler::new(facility, Arc::new(SystemctlPower), plan);
    if settings.persist_schedule {
        scheduler = scheduler.with_store(ScheduleStore::new(&settings.schedule_file));
    }

    spawn_log_reload(config_path.to_path_buf());

    tokio::select! {
        result = scheduler.run() => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, maintenance scheduler exiting");
            Ok(())
        }
    }
}

async fn run_supervise(config: &AppConfig, config_path: &Path, working_directory: &Path) -> Result<()> {
    let workload_settings = &config.workload;
    let entry_point = working_directory.join(&workload_settings.entry_point);
    if !entry_point.is_file() {
        eprintln!("ERROR: Workload entry point not found: {}", entry_point.display());
        std::process::exit(1);
    }

    let workload = CommandWorkload::new(
        entry_point,
        workload_settings.args.clone(),
        working_directory.to_path_buf(),
        workload_settings.output,
    );
    let plan = RestartPlan::from_settings(
        Duration::from_secs(workload_settings.restart_delay_secs),
        &config.supervisor,
    );
    let supervisor = WorkloadSupervisor::new(
        Arc::new(workload),
        plan,
        Duration::from_secs(config.supervisor.stop_timeout_secs),
    );

    info!("Supervising {} (restart delay {}s)", workload_settings.entry_point, workload_settings.restart_delay_secs);
    let handle = supervisor.spawn();
    handle.start();

    spawn_log_reload(config_path.to_path_buf());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut stop = signal(SignalKind::user_defined1())?;
        let mut start = signal(SignalKind::user_defined2())?;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = stop.recv() => {
                    info!("SIGUSR1 received, stopping workload");
                    handle.stop();
                }
                _ = start.recv() => {
                    info!("SIGUSR2 received, starting workload");
                    handle.start();
                }
            }
        }
    }

    #[cfg(not(unix))]
    shutdown_signal().await;

    let restarts = handle.status().restarts;
    info!("Shutdown signal received, stopping workload");
    handle.shutdown().await;
    info!("Supervisor shutdown complete ({} restarts)", restarts);
    Ok(())
}

/// Ctrl+C, or SIGTERM from the service manager.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}

/// SIGHUP re-reads the config file and applies its log level.
fn spawn_log_reload(config_path: PathBuf) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to setup SIGHUP handler: {}", e);
                return;
            }
        };

        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                info!("SIGHUP received, reloading log level configuration");
                match load_config(Some(&config_path)).await {
                    Ok(config) => match reload_level(&config.logging.log_level) {
                        Ok(filter) => info!("Log level reloaded: {}", filter.to_uppercase()),
                        Err(e) => error!("Failed to reload log level: {}", e),
                    },
                    Err(e) => error!("Failed to reload config: {:#}", e),
                }
            }
        });
    }

    #[cfg(not(unix))]
    let _ = config_path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFacility;

    fn installer(facility: Arc<FakeFacility>, elevated: bool) -> Installer {
        Installer::new(
            facility,
            AppConfig::default(),
            InstallOptions {
                supervisor_exe: PathBuf::from("/opt/detect/detection-supervisor"),
                config_path: None,
                elevated,
            },
        )
    }

    #[tokio::test]
    async fn unprivileged_install_exits_1_with_privilege_message() {
        let dir = tempfile::tempdir().unwrap();
        let facility = Arc::new(FakeFacility::new());
        let result = installer(facility.clone(), false).install(dir.path(), "pi").await;

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = report_install(&result, &mut out, &mut err);

        assert_eq!(code, 1);
        assert!(out.is_empty());
        let err = String::from_utf8(err).unwrap();
        assert!(err.starts_with("ERROR: Root privileges required"), "{}", err);
        assert!(!err.contains("Re-run the installer"));
        assert!(facility.calls().is_empty());
    }

    #[tokio::test]
    async fn partial_install_exits_1_and_names_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run_detection.sh"), "#!/bin/sh\n").unwrap();
        let facility = Arc::new(FakeFacility::new());
        facility.fail_on("start", "detection");
        let result = installer(facility, true).install(dir.path(), "pi").await;

        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(report_install(&result, &mut out, &mut err), 1);
        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("ERROR: detection: start rejected"), "{}", err);
        assert!(err.contains("Re-run the installer"));
    }

    #[tokio::test]
    async fn successful_install_exits_0() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run_detection.sh"), "#!/bin/sh\n").unwrap();
        let facility = Arc::new(FakeFacility::new());
        let result = installer(facility, true).install(dir.path(), "pi").await;

        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(report_install(&result, &mut out, &mut err), 0);
        assert!(err.is_empty());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("✓ Units enabled and running: detection, detection-maintenance"));
    }
}
