//! In-process restart loop for the workload.
//!
//! One supervisor owns at most one workload process. Every exit is treated
//! the same way: if the desired state is still "run", the workload is
//! launched again after the restart delay. An explicit stop terminates the
//! process and holds off restarts until the next explicit start.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::types::SupervisorSettings;
use crate::daemon::workload::{ExitOutcome, Workload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub restarts: u64,
    pub last_exit: Option<ExitOutcome>,
    /// Crash-loop breaker open; waiting for an explicit start
    pub tripped: bool,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Stopped,
            restarts: 0,
            last_exit: None,
            tripped: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Run,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub multiplier: f64,
    pub max_delay: Duration,
    pub stable_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashLoopBreaker {
    pub max_restarts: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestartPlan {
    pub delay: Duration,
    pub backoff: Option<Backoff>,
    pub breaker: Option<CrashLoopBreaker>,
}

impl RestartPlan {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            backoff: None,
            breaker: None,
        }
    }

    pub fn from_settings(delay: Duration, settings: &SupervisorSettings) -> Self {
        Self {
            delay,
            backoff: settings.backoff.as_ref().map(|b| Backoff {
                multiplier: b.multiplier.max(1.0),
                max_delay: Duration::from_secs(b.max_delay_secs).max(delay),
                stable_after: Duration::from_secs(b.stable_after_secs),
            }),
            breaker: settings.circuit_breaker.as_ref().map(|b| CrashLoopBreaker {
                max_restarts: b.max_restarts,
                window: Duration::from_secs(b.window_secs),
            }),
        }
    }
}

/// Decides the delay before each restart.
struct RestartTracker {
    plan: RestartPlan,
    next_delay: Duration,
    recent: VecDeque<Instant>,
}

impl RestartTracker {
    fn new(plan: RestartPlan) -> Self {
        let next_delay = plan.delay;
        Self {
            plan,
            next_delay,
            recent: VecDeque::new(),
        }
    }

    fn reset(&mut self) {
        self.next_delay = self.plan.delay;
        self.recent.clear();
    }

    /// Delay before the next launch, or None when the breaker trips.
    fn on_exit(&mut self, ran_for: Duration, now: Instant) -> Option<Duration> {
        if let Some(backoff) = &self.plan.backoff {
            if ran_for >= backoff.stable_after {
                self.next_delay = self.plan.delay;
            }
        }

        if let Some(breaker) = &self.plan.breaker {
            while let Some(first) = self.recent.front() {
                if now.duration_since(*first) > breaker.window {
                    self.recent.pop_front();
                } else {
                    break;
                }
            }
            if self.recent.len() >= breaker.max_restarts as usize {
                return None;
            }
            self.recent.push_back(now);
        }

        let delay = self.next_delay;
        if let Some(backoff) = &self.plan.backoff {
            // Out-of-range products saturate at the cap
            self.next_delay =
                Duration::try_from_secs_f64(self.next_delay.as_secs_f64() * backoff.multiplier)
                    .unwrap_or(backoff.max_delay)
                    .min(backoff.max_delay);
        }
        Some(delay)
    }
}

pub struct WorkloadSupervisor {
    workload: Arc<dyn Workload>,
    plan: RestartPlan,
    stop_timeout: Duration,
}

impl WorkloadSupervisor {
    pub fn new(workload: Arc<dyn Workload>, plan: RestartPlan, stop_timeout: Duration) -> Self {
        Self {
            workload,
            plan,
            stop_timeout,
        }
    }

    /// Spawn the loop. It starts in the stopped state; call `start`.
    pub fn spawn(self) -> SupervisorHandle {
        let (desired_tx, desired_rx) = watch::channel(Desired::Stop);
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());
        let task = tokio::spawn(self.run(desired_rx, status_tx));
        SupervisorHandle {
            desired: desired_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(
        self,
        mut desired: watch::Receiver<Desired>,
        status: watch::Sender<SupervisorStatus>,
    ) {
        let mut tracker = RestartTracker::new(self.plan.clone());

        'idle: loop {
            if !wait_for_run(&mut desired).await {
                return;
            }
            tracker.reset();
            status.send_modify(|s| s.tripped = false);

            loop {
                status.send_modify(|s| s.state = SupervisorState::Starting);
                let launched_at = Instant::now();

                let outcome = match self.workload.launch().await {
                    Ok(mut process) => {
                        status.send_modify(|s| s.state = SupervisorState::Running);
                        info!("Workload running (PID: {:?})", process.id());

                        tokio::select! {
                            exit = process.wait() => match exit {
                                Ok(outcome) => outcome,
                                Err(e) => ExitOutcome::LaunchFailed(format!("{:#}", e)),
                            },
                            next = wait_for_change_from_run(&mut desired) => {
                                status.send_modify(|s| s.state = SupervisorState::Stopping);
                                info!("Stopping workload");
                                let outcome = match process.terminate(self.stop_timeout).await {
                                    Ok(outcome) => outcome,
                                    Err(e) => {
                                        error!("Failed to terminate workload: {:#}", e);
                                        ExitOutcome::Killed
                                    }
                                };
                                status.send_modify(|s| {
                                    s.state = SupervisorState::Stopped;
                                    s.last_exit = Some(outcome);
                                });
                                if next == Desired::Shutdown {
                                    return;
                                }
                                continue 'idle;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Workload launch failed: {:#}", e);
                        ExitOutcome::LaunchFailed(format!("{:#}", e))
                    }
                };

                warn!("Workload exited: {:?}", outcome);
                status.send_modify(|s| {
                    s.state = SupervisorState::Stopped;
                    s.last_exit = Some(outcome);
                });

                match tracker.on_exit(launched_at.elapsed(), Instant::now()) {
                    Some(delay) => {
                        info!("Restarting workload in {:?}", delay);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            next = wait_for_change_from_run(&mut desired) => {
                                if next == Desired::Shutdown {
                                    return;
                                }
                                continue 'idle;
                            }
                        }
                        status.send_modify(|s| s.restarts += 1);
                    }
                    None => {
                        error!("Workload is crash looping; restarts suspended until an explicit start");
                        status.send_modify(|s| s.tripped = true);
                        match wait_for_command(&mut desired).await {
                            Desired::Run => {
                                tracker.reset();
                                status.send_modify(|s| s.tripped = false);
                            }
                            Desired::Stop => continue 'idle,
                            Desired::Shutdown => return,
                        }
                    }
                }
            }
        }
    }
}

/// Returns false on shutdown.
async fn wait_for_run(desired: &mut watch::Receiver<Desired>) -> bool {
    loop {
        match *desired.borrow_and_update() {
            Desired::Run => return true,
            Desired::Shutdown => return false,
            Desired::Stop => {}
        }
        if desired.changed().await.is_err() {
            return false;
        }
    }
}

async fn wait_for_change_from_run(desired: &mut watch::Receiver<Desired>) -> Desired {
    loop {
        let current = *desired.borrow_and_update();
        if current != Desired::Run {
            return current;
        }
        if desired.changed().await.is_err() {
            return Desired::Shutdown;
        }
    }
}

/// Next command sent after this point, even if it repeats the current one.
async fn wait_for_command(desired: &mut watch::Receiver<Desired>) -> Desired {
    desired.borrow_and_update();
    match desired.changed().await {
        Ok(()) => *desired.borrow_and_update(),
        Err(_) => Desired::Shutdown,
    }
}

pub struct SupervisorHandle {
    desired: watch::Sender<Desired>,
    status: watch::Receiver<SupervisorStatus>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn start(&self) {
        self.desired.send_replace(Desired::Run);
    }

    pub fn stop(&self) {
        self.desired.send_replace(Desired::Stop);
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Terminate the workload (if running) and wait for the loop to end.
    pub async fn shutdown(self) {
        self.desired.send_replace(Desired::Shutdown);
        if let Err(e) = self.task.await {
            error!("Supervisor task failed: {}", e);
        }
    }
}
