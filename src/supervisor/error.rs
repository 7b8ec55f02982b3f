//! Supervisor 전용 에러 타입 — 프런트엔드가 종류별로 메시지를 고르고
//! 재시도 가능 여부를 판단할 수 있게 합니다.

use std::time::Duration;

use super::state_machine::SupervisorState;

/// Supervisor 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn workload '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to wait for workload (pid {pid}): {reason}")]
    WaitFailed { pid: u32, reason: String },

    #[error("Failed to terminate workload (pid {pid}): {reason}")]
    TerminateFailed { pid: u32, reason: String },

    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SupervisorState,
        to: SupervisorState,
    },

    #[error("Supervisor did not return to Idle within {0:?}")]
    StopTimeout(Duration),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::WaitFailed { .. } => "WAIT_FAILED",
            Self::TerminateFailed { .. } => "TERMINATE_FAILED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::StopTimeout(_) => "STOP_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
