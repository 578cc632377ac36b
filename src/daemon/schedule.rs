//! Persisted next-reboot time, so the cadence survives unrelated reboots.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub next_fire: DateTime<Utc>,
}

pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stored next-fire time; unreadable or corrupt files count as absent.
    pub async fn load(&self) -> Option<DateTime<Utc>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("No schedule at {:?}: {}", self.path, e);
                return None;
            }
        };
        match serde_json::from_str::<ScheduleRecord>(&content) {
            Ok(record) => Some(record.next_fire),
            Err(e) => {
                warn!("Ignoring corrupt schedule file {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub async fn save(&self, next_fire: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&ScheduleRecord { next_fire })?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write schedule {:?}", self.path))?;
        Ok(())
    }
}

/// How long to wait and which next-fire time that corresponds to.
/// Overdue → fire now; absent or further out than one interval → a full interval.
pub fn plan_dwell(
    now: DateTime<Utc>,
    stored: Option<DateTime<Utc>>,
    interval: Duration,
) -> (Duration, DateTime<Utc>) {
    let full = || {
        let next = now + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
        (interval, next)
    };

    match stored {
        Some(next) if next <= now => (Duration::ZERO, now),
        Some(next) => match (next - now).to_std() {
            Ok(remaining) if remaining <= interval => (remaining, next),
            _ => full(),
        },
        None => full(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DAY: Duration = Duration::from_secs(86_400);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn absent_schedule_waits_a_full_interval() {
        assert_eq!(plan_dwell(t(0), None, DAY), (DAY, t(86_400)));
    }

    #[test]
    fn pending_schedule_waits_the_remainder() {
        let (dwell, next) = plan_dwell(t(0), Some(t(3_600)), DAY);
        assert_eq!(dwell, Duration::from_secs(3_600));
        assert_eq!(next, t(3_600));
    }

    #[test]
    fn overdue_schedule_fires_immediately() {
        assert_eq!(plan_dwell(t(100), Some(t(50)), DAY), (Duration::ZERO, t(100)));
    }

    #[test]
    fn schedule_beyond_one_interval_is_clamped() {
        assert_eq!(plan_dwell(t(0), Some(t(10 * 86_400)), DAY), (DAY, t(86_400)));
    }

    #[tokio::test]
    async fn store_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("state/schedule.json"));
        assert_eq!(store.load().await, None);

        store.save(t(42)).await.unwrap();
        assert_eq!(store.load().await, Some(t(42)));

        std::fs::write(dir.path().join("state/schedule.json"), "garbage").unwrap();
        assert_eq!(store.load().await, None);
    }
}
