//! In-memory stand-ins for the host facilities, shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::daemon::power::HostPower;
use crate::daemon::systemd::{SupervisionFacility, WriteOutcome};
use crate::daemon::unit::UnitDescriptor;

#[derive(Debug, Clone)]
pub struct FacilityCall {
    pub at: Instant,
    pub action: String,
    pub unit: String,
}

#[derive(Default)]
pub struct FakeFacility {
    files: Mutex<BTreeMap<String, String>>,
    enabled: Mutex<BTreeSet<String>>,
    active: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<FacilityCall>>,
    failing: Mutex<BTreeSet<(String, String)>>,
}

impl FakeFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `action` on `unit` fail from now on.
    pub fn fail_on(&self, action: &str, unit: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((action.to_string(), unit.to_string()));
    }

    pub fn set_active(&self, unit: &str, active: bool) {
        let mut set = self.active.lock().unwrap();
        if active {
            set.insert(unit.to_string());
        } else {
            set.remove(unit);
        }
    }

    pub fn calls(&self) -> Vec<FacilityCall> {
        self.calls.lock().unwrap().clone()
    }

    /// (action, unit) pairs in call order
    pub fn actions(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .map(|c| (c.action, c.unit))
            .collect()
    }

    pub fn file(&self, unit: &str) -> Option<String> {
        self.files.lock().unwrap().get(unit).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn enabled(&self, unit: &str) -> bool {
        self.enabled.lock().unwrap().contains(unit)
    }

    pub fn active(&self, unit: &str) -> bool {
        self.active.lock().unwrap().contains(unit)
    }

    fn record(&self, action: &str, unit: &str) -> Result<()> {
        self.calls.lock().unwrap().push(FacilityCall {
            at: Instant::now(),
            action: action.to_string(),
            unit: unit.to_string(),
        });
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(action.to_string(), unit.to_string()))
        {
            return Err(anyhow!("{} {} rejected", action, unit));
        }
        Ok(())
    }
}

#[async_trait]
impl SupervisionFacility for FakeFacility {
    async fn register(&self, unit: &UnitDescriptor) -> Result<WriteOutcome> {
        self.record("register", &unit.name)?;
        let content = unit.render();
        let mut files = self.files.lock().unwrap();
        let outcome = match files.get(&unit.name) {
            Some(existing) if *existing == content => WriteOutcome::Unchanged,
            Some(_) => WriteOutcome::Updated,
            None => WriteOutcome::Created,
        };
        files.insert(unit.name.clone(), content);
        Ok(outcome)
    }

    async fn unregister(&self, unit: &str) -> Result<bool> {
        self.record("unregister", unit)?;
        Ok(self.files.lock().unwrap().remove(unit).is_some())
    }

    async fn is_registered(&self, unit: &str) -> bool {
        self.files.lock().unwrap().contains_key(unit)
    }

    async fn reload(&self) -> Result<()> {
        self.record("reload", "")
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.record("enable", unit)?;
        self.enabled.lock().unwrap().insert(unit.to_string());
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        self.record("disable", unit)?;
        self.enabled.lock().unwrap().remove(unit);
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.record("start", unit)?;
        self.set_active(unit, true);
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.record("restart", unit)?;
        self.set_active(unit, true);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.record("stop", unit)?;
        self.set_active(unit, false);
        Ok(())
    }

    async fn request_stop(&self, unit: &str) -> Result<()> {
        self.record("request_stop", unit)?;
        self.set_active(unit, false);
        Ok(())
    }

    async fn is_active(&self, unit: &str) -> bool {
        self.active(unit)
    }

    async fn is_enabled(&self, unit: &str) -> bool {
        self.enabled(unit)
    }
}

#[derive(Default)]
pub struct FakePower {
    reboots: Mutex<Vec<Instant>>,
    fail: bool,
}

impl FakePower {
    pub fn failing() -> Self {
        Self {
            reboots: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reboots(&self) -> Vec<Instant> {
        self.reboots.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostPower for FakePower {
    async fn reboot(&self) -> Result<()> {
        self.reboots.lock().unwrap().push(Instant::now());
        if self.fail {
            return Err(anyhow!("reboot refused"));
        }
        Ok(())
    }
}
