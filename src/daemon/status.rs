use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::types::AppConfig;
use crate::daemon::schedule::ScheduleStore;
use crate::daemon::systemd::{has_systemd, SupervisionFacility};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub name: String,
    pub installed: bool,
    pub enabled: bool,
    pub active: bool,
}

pub async fn collect_unit_reports(
    facility: &Arc<dyn SupervisionFacility>,
    config: &AppConfig,
) -> Vec<UnitReport> {
    let mut reports = Vec::new();
    for name in [&config.workload.unit_name, &config.maintenance.unit_name] {
        reports.push(UnitReport {
            name: name.clone(),
            installed: facility.is_registered(name).await,
            enabled: facility.is_enabled(name).await,
            active: facility.is_active(name).await,
        });
    }
    reports
}

pub async fn show_status(
    facility: Arc<dyn SupervisionFacility>,
    config: &AppConfig,
    working_directory: &Path,
) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    println!(
        "\x1b[32mdetection-supervisor v{} ({}) on {}\x1b[0m",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        host
    );
    println!("================================");

    if !has_systemd() {
        println!("- Systemd: Not available on this system");
        println!("  Run the workload in the foreground with: ./detection-supervisor --supervise");
    }

    let entry_point = working_directory.join(&config.workload.entry_point);
    if entry_point.is_file() {
        println!("✓ Workload entry point: {}", entry_point.display());
    } else {
        println!("✗ Workload entry point: NOT FOUND ({})", entry_point.display());
    }

    for report in collect_unit_reports(&facility, config).await {
        if !report.installed {
            println!("✗ {}: NOT INSTALLED", report.name);
            println!("  Run: sudo ./detection-supervisor --install");
            continue;
        }
        let enabled = if report.enabled { "enabled" } else { "NOT enabled" };
        let active = if report.active { "active" } else { "inactive" };
        let mark = if report.enabled && report.active { "✓" } else { "⚠" };
        println!("{} {}: installed, {}, {}", mark, report.name, enabled, active);
    }

    let maintenance = &config.maintenance;
    println!(
        "\nMaintenance: reboot every {}s, {}s grace",
        maintenance.dwell_secs, maintenance.grace_secs
    );
    if maintenance.persist_schedule {
        match ScheduleStore::new(&maintenance.schedule_file).load().await {
            Some(next) => println!("   Next reboot: {}", next.to_rfc3339()),
            None => println!("   Next reboot: not yet scheduled"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFacility;

    #[tokio::test]
    async fn reports_each_unit_state() {
        let fake = Arc::new(FakeFacility::new());
        fake.enable("detection").await.unwrap();
        fake.start("detection").await.unwrap();
        let facility: Arc<dyn SupervisionFacility> = fake;

        let reports = collect_unit_reports(&facility, &AppConfig::default()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "detection");
        assert!(reports[0].enabled && reports[0].active && !reports[0].installed);
        assert_eq!(reports[1].name, "detection-maintenance");
        assert!(!reports[1].enabled && !reports[1].active);
    }
}
