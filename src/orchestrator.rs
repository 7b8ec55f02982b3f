//! Ties the update flow and the process supervisor together for the front-end.
//!
//! Holds the single supervisor, the last update check result and the loaded
//! audio capability. Every entry point is safe to call in any state.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use screensaver_updater_lib::{
    ApplyError, ApplyReport, UpdateCheckResult, UpdateChecker, UpdatePipeline,
};
use tokio::sync::broadcast;

use crate::capability::AudioCapability;
use crate::config::{Settings, WorkloadConfig};
use crate::supervisor::{
    ProcessSupervisor, SupervisorError, SupervisorEvent, SupervisorState, WorkloadCommand,
};

pub struct Orchestrator {
    settings: Settings,
    supervisor: ProcessSupervisor,
    checker: UpdateChecker,
    pipeline: UpdatePipeline,
    last_check: RwLock<Option<UpdateCheckResult>>,
    capability: RwLock<Arc<AudioCapability>>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let checker = UpdateChecker::from_config(&settings.update)?;
        let pipeline = UpdatePipeline::new(settings.update.clone())?;
        let supervisor = ProcessSupervisor::with_grace_period(Duration::from_secs(
            settings.workload.stop_grace_secs,
        ));
        let capability = AudioCapability::load(&settings.native_library_path());

        Ok(Self {
            settings,
            supervisor,
            checker,
            pipeline,
            last_check: RwLock::new(None),
            capability: RwLock::new(Arc::new(capability)),
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    pub fn last_check(&self) -> Option<UpdateCheckResult> {
        self.last_check
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn set_last_check(&self, result: Option<UpdateCheckResult>) {
        match self.last_check.write() {
            Ok(mut guard) => *guard = result,
            Err(e) => *e.into_inner() = result,
        }
    }

    /// Current audio probe, for the inactivity monitor.
    pub fn audio_capability(&self) -> Arc<AudioCapability> {
        match self.capability.read() {
            Ok(guard) => guard.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn reload_capability(&self) {
        let capability = Arc::new(AudioCapability::load(&self.settings.native_library_path()));
        match self.capability.write() {
            Ok(mut guard) => *guard = capability,
            Err(e) => *e.into_inner() = capability,
        }
    }

    pub async fn check_for_updates(&self) -> UpdateCheckResult {
        let result = self.checker.check().await;
        self.set_last_check(Some(result.clone()));
        result
    }

    /// User answered the update prompt. Applies only if the last check found
    /// an update; stops the workload first since its files are replaced.
    pub async fn on_update_confirmed(
        &self,
        accepted: bool,
    ) -> Result<Option<ApplyReport>, ApplyError> {
        let (remote, sha256) = match self.last_check() {
            Some(UpdateCheckResult::UpdateAvailable {
                remote_version,
                sha256,
                ..
            }) => (remote_version, sha256),
            _ => {
                tracing::info!("[Orchestrator] No pending update to apply");
                return Ok(None);
            }
        };

        if !accepted {
            tracing::info!("[Orchestrator] Update to {} declined", remote);
            return Ok(None);
        }

        if self.supervisor.is_running() {
            tracing::info!("[Orchestrator] Stopping workload before update");
            if let Err(e) = self.supervisor.stop().await {
                tracing::warn!("[Orchestrator] {}", e);
            }
        }

        let report = self
            .pipeline
            .apply_with_checksum(&remote, sha256.as_deref())
            .await;

        match report {
            Ok(report) => {
                self.set_last_check(Some(UpdateCheckResult::NoUpdate {
                    current: report.version.clone(),
                }));
                self.reload_capability();
                Ok(Some(report))
            }
            Err(e) => {
                if e.installation_touched() {
                    tracing::error!(
                        "[Orchestrator] Installation may be partially updated; re-run the update to converge"
                    );
                }
                Err(e)
            }
        }
    }

    /// Command line for the workload: configured program and args plus the
    /// timeout in minutes from `config.json`.
    pub fn workload_command(&self) -> WorkloadCommand {
        let config_path = self.settings.workload_config_path();
        let config = WorkloadConfig::load(&config_path).unwrap_or_else(|e| {
            tracing::warn!("[Orchestrator] {:#}, using default timeout", e);
            WorkloadConfig::default()
        });

        let mut command = WorkloadCommand::new(&self.settings.workload.program)
            .args(self.settings.workload.args.iter().cloned())
            .arg(config.timeout_minutes().to_string())
            .working_dir(self.settings.workload_dir());
        for (key, value) in &self.settings.workload.env {
            command = command.env(key, value);
        }
        command.log_pattern = self.settings.workload.log_pattern.clone();
        command
    }

    /// Returns `false` if the loop was already running.
    pub fn on_start_requested(&self) -> bool {
        let started = self.supervisor.start(self.workload_command());
        if started {
            tracing::info!("[Orchestrator] Workload loop started");
        }
        started
    }

    /// Stops the loop and waits for it to settle. No-op when idle.
    pub async fn on_stop_requested(&self) -> Result<(), SupervisorError> {
        self.supervisor.stop().await
    }

    pub fn workload_config_path(&self) -> PathBuf {
        self.settings.workload_config_path()
    }

    /// Saves a new timeout; takes effect on the next start.
    pub fn set_timeout_minutes(&self, minutes: u64) -> anyhow::Result<WorkloadConfig> {
        let path = self.workload_config_path();
        let mut config = WorkloadConfig::load(&path).unwrap_or_default();
        config.set_timeout_minutes(minutes)?;
        config.save(&path)?;
        Ok(config)
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.supervisor.stop().await {
            tracing::error!("[Orchestrator] {} ({})", e, e.error_code());
        }
    }
}
