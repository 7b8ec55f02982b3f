pub mod error;
pub mod managed_process;
pub mod process;
pub mod state_machine;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use error::SupervisorError;
pub use managed_process::{LogLevel, LogLine, LogSource, ManagedProcess, WorkloadCommand};
pub use state_machine::{StateCell, SupervisorState};

/// Time the workload gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);
/// How long output readers may keep flushing after the child exits.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Extra slack a stop caller allows on top of the grace period.
pub const STOP_CONFIRM_MARGIN: Duration = Duration::from_secs(1);

/// Output lines attached to a crash notification.
const CRASH_OUTPUT_LINES: usize = 50;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Why a supervisor loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    Crashed { exit_code: Option<i32> },
    SpawnFailed,
    WaitFailed,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Spawned { iteration: u64, pid: u32 },
    Output(LogLine),
    /// Clean exit; respawning
    Restarting { iteration: u64 },
    /// Nonzero exit. The loop has stopped and "Run" should be re-enabled.
    Crashed {
        exit_code: Option<i32>,
        output: Vec<LogLine>,
    },
    SpawnFailed { error: String },
    Stopped { reason: StopReason },
}

struct LoopControl {
    token: CancellationToken,
}

/// Runs the workload in a restart loop on its own task.
///
/// - exit code 0 → respawn immediately
/// - nonzero exit, spawn or wait failure → back to `Idle`
/// - `request_stop()` → SIGTERM, grace period, kill, back to `Idle`
///
/// At most one loop runs at a time; `start` while running is a no-op.
pub struct ProcessSupervisor {
    state: Arc<StateCell>,
    events: broadcast::Sender<SupervisorEvent>,
    control: Mutex<Option<LoopControl>>,
    spawn_count: Arc<AtomicU64>,
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_grace_period(STOP_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(StateCell::new()),
            events,
            control: Mutex::new(None),
            spawn_count: Arc::new(AtomicU64::new(0)),
            grace,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SupervisorState::Idle
    }

    /// Total workload spawns since this supervisor was created.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Bounded time a stop caller waits for `Idle`.
    pub fn stop_timeout(&self) -> Duration {
        self.grace + OUTPUT_DRAIN_TIMEOUT + STOP_CONFIRM_MARGIN
    }

    fn control(&self) -> MutexGuard<'_, Option<LoopControl>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the restart loop. Returns `false` if a loop is already active.
    pub fn start(&self, command: WorkloadCommand) -> bool {
        let mut control = self.control();
        if !self
            .state
            .transition_from(SupervisorState::Idle, SupervisorState::Running)
        {
            tracing::debug!("[Supervisor] Start ignored, loop already active ({:?})", self.state());
            return false;
        }

        let token = CancellationToken::new();
        tokio::spawn(supervise(
            command,
            self.state.clone(),
            self.events.clone(),
            token.clone(),
            self.spawn_count.clone(),
            self.grace,
        ));
        *control = Some(LoopControl { token });
        true
    }

    /// Signal the loop to stop. Returns `false` if nothing was running.
    pub fn request_stop(&self) -> bool {
        let control = self.control();
        if !self
            .state
            .transition_from(SupervisorState::Running, SupervisorState::StopRequested)
        {
            return false;
        }
        if let Some(control) = control.as_ref() {
            control.token.cancel();
        }
        tracing::info!("[Supervisor] Stop requested");
        true
    }

    /// Wait until the loop is back to `Idle`.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let mut rx = self.state.subscribe();
        // drop the watch::Ref before rx goes out of scope
        let res = tokio::time::timeout(timeout, rx.wait_for(|s| *s == SupervisorState::Idle))
            .await
            .map(|r| r.map(|_| ()));
        match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SupervisorError::Internal(anyhow::anyhow!(
                "supervisor state channel closed"
            ))),
            Err(_) => Err(SupervisorError::StopTimeout(timeout)),
        }
    }

    /// Request stop and wait (bounded) for confirmation. Safe when idle.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request_stop();
        self.wait_idle(self.stop_timeout()).await
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(control) = self.control().as_ref() {
            control.token.cancel();
        }
    }
}

async fn supervise(
    command: WorkloadCommand,
    state: Arc<StateCell>,
    events: broadcast::Sender<SupervisorEvent>,
    token: CancellationToken,
    spawn_count: Arc<AtomicU64>,
    grace: Duration,
) {
    let mut iteration: u64 = 0;

    let reason = loop {
        if token.is_cancelled() {
            break StopReason::Requested;
        }
        iteration += 1;

        let mut process = match ManagedProcess::spawn(&command, events.clone()) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("[Supervisor] {}", e);
                let _ = events.send(SupervisorEvent::SpawnFailed { error: e.to_string() });
                break StopReason::SpawnFailed;
            }
        };
        spawn_count.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(SupervisorEvent::Spawned {
            iteration,
            pid: process.pid,
        });

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            status = process.wait() => Some(status),
        };

        match outcome {
            None => {
                if let Err(e) = state.transition(SupervisorState::Stopping) {
                    tracing::debug!("[Supervisor] {}", e);
                }
                match process.terminate(grace).await {
                    Ok(status) => tracing::info!("[Supervisor] Workload stopped ({})", status),
                    Err(e) => tracing::error!("[Supervisor] {}", e),
                }
                process.drain_output(OUTPUT_DRAIN_TIMEOUT).await;
                break StopReason::Requested;
            }
            Some(Ok(status)) if status.success() => {
                process.drain_output(OUTPUT_DRAIN_TIMEOUT).await;
                tracing::info!("[Supervisor] Workload finished cleanly, restarting (run {})", iteration);
                let _ = events.send(SupervisorEvent::Restarting { iteration });
            }
            Some(Ok(status)) => {
                process.drain_output(OUTPUT_DRAIN_TIMEOUT).await;
                process
                    .push_system(format!("Process exited with {}", status))
                    .await;
                let output = process.recent_output(CRASH_OUTPUT_LINES).await;
                tracing::error!("[Supervisor] Workload exited with {}; restart loop stopped", status);
                for line in &output {
                    tracing::error!("[Supervisor]   | {}", line.content);
                }
                let exit_code = status.code();
                let _ = events.send(SupervisorEvent::Crashed { exit_code, output });
                break StopReason::Crashed { exit_code };
            }
            Some(Err(e)) => {
                tracing::error!("[Supervisor] {}", e);
                if let Err(e) = process.terminate(grace).await {
                    tracing::error!("[Supervisor] {}", e);
                }
                break StopReason::WaitFailed;
            }
        }
    };

    state.reset();
    tracing::info!("[Supervisor] Loop ended: {:?}", reason);
    let _ = events.send(SupervisorEvent::Stopped { reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let sup = ProcessSupervisor::new();
        assert!(!sup.request_stop());
        assert!(sup.stop().await.is_ok());
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn spawn_failure_returns_to_idle() {
        let sup = ProcessSupervisor::new();
        let mut events = sup.subscribe();
        assert!(sup.start(WorkloadCommand::new("/nonexistent/screensaver-workload")));
        sup.wait_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(sup.spawn_count(), 0);
        assert!(matches!(events.recv().await.unwrap(), SupervisorEvent::SpawnFailed { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            SupervisorEvent::Stopped { reason: StopReason::SpawnFailed }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wait_idle_times_out_while_running() {
        let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(300));
        assert!(sup.start(WorkloadCommand::new("sleep").args(["30"])));

        let err = sup.wait_idle(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::StopTimeout(_)));
        assert_eq!(sup.state(), SupervisorState::Running);

        sup.stop().await.unwrap();
        sup.wait_idle(Duration::from_millis(100)).await.unwrap();
    }

    #[test]
    fn stop_timeout_covers_grace_and_drain() {
        let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(300));
        assert_eq!(
            sup.stop_timeout(),
            Duration::from_millis(300) + OUTPUT_DRAIN_TIMEOUT + STOP_CONFIRM_MARGIN
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = SupervisorEvent::Stopped {
            reason: StopReason::Crashed { exit_code: Some(7) },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stopped");
        assert_eq!(json["reason"]["kind"], "crashed");
        assert_eq!(json["reason"]["exit_code"], 7);
    }
}
