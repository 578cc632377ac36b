//! Periodic maintenance reboot: dwell, stop the workload, grace, reboot.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::types::MaintenanceSettings;
use crate::daemon::power::HostPower;
use crate::daemon::schedule::{plan_dwell, ScheduleStore};
use crate::daemon::systemd::SupervisionFacility;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Time since the scheduler last (re)started. Not persisted.
#[derive(Debug, Clone)]
pub struct MaintenanceTimer {
    interval: Duration,
    started: Instant,
}

impl MaintenanceTimer {
    pub fn start(interval: Duration) -> Self {
        Self {
            interval,
            started: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    fn deadline(&self, dwell: Duration) -> Instant {
        self.started + dwell
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenancePlan {
    pub dwell: Duration,
    pub grace: Duration,
    pub workload_unit: String,
    pub confirm_stop: bool,
}

impl MaintenancePlan {
    pub fn from_settings(settings: &MaintenanceSettings, workload_unit: &str) -> Self {
        Self {
            dwell: Duration::from_secs(settings.dwell_secs),
            grace: Duration::from_secs(settings.grace_secs),
            workload_unit: workload_unit.to_string(),
            confirm_stop: settings.confirm_stop,
        }
    }
}

pub struct MaintenanceScheduler {
    facility: Arc<dyn SupervisionFacility>,
    power: Arc<dyn HostPower>,
    plan: MaintenancePlan,
    store: Option<ScheduleStore>,
    timer: MaintenanceTimer,
}

impl MaintenanceScheduler {
    pub fn new(
        facility: Arc<dyn SupervisionFacility>,
        power: Arc<dyn HostPower>,
        plan: MaintenancePlan,
    ) -> Self {
        let timer = MaintenanceTimer::start(plan.dwell);
        Self {
            facility,
            power,
            plan,
            store: None,
            timer,
        }
    }

    /// Keep the next reboot time on disk instead of restarting the count on every boot.
    pub fn with_store(mut self, store: ScheduleStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn timer(&self) -> &MaintenanceTimer {
        &self.timer
    }

    /// Only returns if a reboot request fails.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.run_cycle().await?;
        }
    }

    /// One dwell → stop → grace → reboot pass. If the reboot call comes back,
    /// we behave as a freshly started scheduler.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let dwell = self.current_dwell().await;
        info!(
            "Next maintenance reboot in {}s (interval {}s, stops unit {})",
            dwell.as_secs(),
            self.timer.interval().as_secs(),
            self.plan.workload_unit
        );
        tokio::time::sleep_until(self.timer.deadline(dwell)).await;

        info!(
            "Maintenance due after {}s, stopping {}",
            self.timer.elapsed().as_secs(),
            self.plan.workload_unit
        );
        if let Err(e) = self.facility.request_stop(&self.plan.workload_unit).await {
            warn!("Stop request for {} failed: {:#}", self.plan.workload_unit, e);
        }

        self.observe_grace().await;

        if let Some(store) = &self.store {
            let (_, next) = plan_dwell(Utc::now(), None, self.plan.dwell);
            if let Err(e) = store.save(next).await {
                warn!("Failed to persist next maintenance time: {:#}", e);
            }
        }

        self.power
            .reboot()
            .await
            .context("Reboot request failed")?;

        self.timer.reset();
        Ok(())
    }

    async fn current_dwell(&self) -> Duration {
        let Some(store) = &self.store else {
            return self.plan.dwell;
        };

        let now = Utc::now();
        let stored = store.load().await;
        let (dwell, next) = plan_dwell(now, stored, self.plan.dwell);
        if stored != Some(next) {
            if let Err(e) = store.save(next).await {
                warn!("Failed to persist next maintenance time: {:#}", e);
            }
        }
        dwell
    }

    async fn observe_grace(&self) {
        if !self.plan.confirm_stop {
            tokio::time::sleep(self.plan.grace).await;
            return;
        }

        let deadline = Instant::now() + self.plan.grace;
        loop {
            if !self.facility.is_active(&self.plan.workload_unit).await {
                info!("{} stopped, proceeding", self.plan.workload_unit);
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} still active after {:?}, rebooting anyway",
                    self.plan.workload_unit, self.plan.grace
                );
                return;
            }
            tokio::time::sleep_until((Instant::now() + STOP_POLL_INTERVAL).min(deadline)).await;
        }
    }
}
