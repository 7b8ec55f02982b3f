//! 에러 처리 및 복구 로직
//!
//! ## 에러 분류
//! - 네트워크 끊김 / 타임아웃 (호출자가 재시도)
//! - 프로토콜 오류 (HTTP 상태 코드, 잘못된 JSON)
//! - 버전 문자열 검증 실패
//! - 손상된 업데이트 패키지
//! - 파일 시스템 오류 (오버레이 도중이면 설치 트리가 부분 갱신됨)
//! - 네이티브 빌드 툴체인 오류

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// 업데이터 에러 타입
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 네트워크 연결 실패
    NetworkError {
        message: String,
        recoverable: bool,
    },
    /// HTTP 요청 타임아웃
    Timeout {
        operation: String,
        duration_secs: u64,
    },
    /// 비정상 상태 코드 또는 해석할 수 없는 응답 본문
    ProtocolError {
        status_code: Option<u16>,
        message: String,
    },
    /// 형식에 맞지 않는 버전 문자열. 경로 조립에 절대 사용하지 않음
    ValidationError {
        value: String,
        reason: String,
    },
    /// zip 해석 실패, 체크섬 불일치, 경로 탈출 엔트리 등
    CorruptPackage {
        message: String,
    },
    /// 파일 시스템 오류
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },
    /// 네이티브 컴포넌트 재빌드 실패
    ToolchainError {
        command: String,
        message: String,
    },
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::NetworkError { message, .. } => {
                write!(f, "Network error: {}", message)
            }
            UpdaterError::Timeout { operation, duration_secs } => {
                write!(f, "Timeout after {}s: {}", duration_secs, operation)
            }
            UpdaterError::ProtocolError { status_code: Some(code), message } => {
                write!(f, "Protocol error ({}): {}", code, message)
            }
            UpdaterError::ProtocolError { status_code: None, message } => {
                write!(f, "Protocol error: {}", message)
            }
            UpdaterError::ValidationError { value, reason } => {
                write!(f, "Invalid version '{}': {}", value, reason)
            }
            UpdaterError::CorruptPackage { message } => {
                write!(f, "Corrupt update package: {}", message)
            }
            UpdaterError::FileSystemError { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
            UpdaterError::ToolchainError { command, message } => {
                write!(f, "Native rebuild failed ({}): {}", command, message)
            }
        }
    }
}

impl std::error::Error for UpdaterError {}

/// 로그 심각도 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
    Critical,
}

impl UpdaterError {
    /// 복구 가능한 에러인지 확인
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::NetworkError { recoverable, .. } => *recoverable,
            UpdaterError::Timeout { .. } => true,
            UpdaterError::ProtocolError { status_code, .. } => {
                // 5xx만 재시도, 4xx와 본문 해석 실패는 원인 확인 필요
                matches!(status_code, Some(code) if *code >= 500)
            }
            UpdaterError::CorruptPackage { .. } => true, // 재다운로드로 복구 가능
            UpdaterError::ValidationError { .. } => false,
            UpdaterError::FileSystemError { .. } => false,
            UpdaterError::ToolchainError { .. } => false,
        }
    }

    /// 로그 출력 시 사용하는 심각도
    pub fn severity(&self) -> Severity {
        match self {
            // 오버레이 중단은 설치 트리를 알 수 없는 상태로 남김
            UpdaterError::FileSystemError { .. } => Severity::Critical,
            UpdaterError::ToolchainError { .. } | UpdaterError::ValidationError { .. } => {
                Severity::Error
            }
            _ if self.is_recoverable() => Severity::Warn,
            _ => Severity::Error,
        }
    }

    /// 권장 재시도 대기 시간
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base_delay = match self {
            UpdaterError::NetworkError { .. } => Duration::from_secs(2),
            UpdaterError::Timeout { .. } => Duration::from_secs(5),
            UpdaterError::ProtocolError { status_code: Some(429), .. } => Duration::from_secs(30),
            UpdaterError::ProtocolError { .. } => Duration::from_secs(3),
            _ => Duration::from_secs(1),
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);
        Duration::from_secs(delay_secs.min(60))
    }

    /// 사용자에게 표시할 메시지
    pub fn user_message(&self) -> String {
        match self {
            UpdaterError::NetworkError { .. } | UpdaterError::Timeout { .. } => {
                "Do you have internet? I need internet to check for updates.".to_string()
            }
            UpdaterError::ProtocolError { status_code: Some(404), .. } => {
                "The requested update could not be found.".to_string()
            }
            UpdaterError::ProtocolError { status_code: Some(code), .. } if *code >= 500 => {
                "The update server is having trouble. Please try again later.".to_string()
            }
            UpdaterError::ProtocolError { .. } => {
                "The update server sent an unexpected response.".to_string()
            }
            UpdaterError::ValidationError { value, .. } => {
                format!("'{}' is not a valid version.", value)
            }
            UpdaterError::CorruptPackage { .. } => {
                "The downloaded update is damaged. Please try again.".to_string()
            }
            UpdaterError::FileSystemError { .. } => {
                "Installing the update failed part-way. Run the update again to finish it.".to_string()
            }
            UpdaterError::ToolchainError { .. } => {
                "The update was installed, but the audio helper could not be rebuilt.".to_string()
            }
        }
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, operation: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            UpdaterError::Timeout {
                operation: operation.to_string(),
                duration_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            UpdaterError::NetworkError {
                message: format!("{}: connection failed", operation),
                recoverable: true,
            }
        } else if let Some(status) = err.status() {
            UpdaterError::ProtocolError {
                status_code: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            UpdaterError::ProtocolError {
                status_code: None,
                message: err.to_string(),
            }
        } else {
            UpdaterError::NetworkError {
                message: err.to_string(),
                recoverable: err.is_request() || err.is_body(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &std::path::Path) -> Self {
        UpdaterError::FileSystemError {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// 에러 복구 전략 (부작용이 없는 다운로드 단계에서만 사용)
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 현재 시도 횟수
    pub current_attempt: u32,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            current_attempt: 0,
        }
    }
}

impl RecoveryStrategy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// 주어진 에러 이후 재시도 가능한지 확인
    pub fn should_retry(&self, err: &UpdaterError) -> bool {
        err.is_recoverable() && self.current_attempt < self.max_retries
    }

    /// 다음 시도 전 대기 시간
    pub fn next_delay(&self, err: &UpdaterError) -> Duration {
        err.retry_delay(self.current_attempt)
    }

    /// 시도 횟수 증가
    pub fn increment(&mut self) {
        self.current_attempt += 1;
    }
}

/// 에러 컨텍스트 (디버깅/로깅용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub timestamp: String,
    pub operation: String,
    pub error: UpdaterError,
}

impl ErrorContext {
    pub fn new(operation: &str, error: UpdaterError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            error,
        }
    }

    /// 심각도 태그와 함께 로그 출력
    pub fn log(&self) {
        match self.error.severity() {
            Severity::Warn => tracing::warn!(
                "[Error] {} at {} (recoverable): {}",
                self.operation,
                self.timestamp,
                self.error
            ),
            Severity::Error => tracing::error!(
                "[Error] {} at {} (fatal): {}",
                self.operation,
                self.timestamp,
                self.error
            ),
            Severity::Critical => tracing::error!(
                "[Error] {} at {} (CRITICAL, installation state unknown): {}",
                self.operation,
                self.timestamp,
                self.error
            ),
        }
    }
}
