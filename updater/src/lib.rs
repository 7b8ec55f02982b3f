//! # ScreenSaver 업데이터 라이브러리
//!
//! 원격 버전 디스크립터를 확인하고, 사용자가 승인하면 버전별 zip 패키지를
//! 내려받아 설치 트리에 덮어씁니다.
//!
//! ## 구성
//! - **version.rs**: `vMAJOR[.MINOR[.PATCH]]` 검증
//! - **store.rs**: 로컬 `version.json`
//! - **remote.rs**: 디스크립터/아카이브 HTTP 클라이언트
//! - **checker.rs**: 업데이트 유무 판정 (문자열 일치 비교)
//! - **pipeline.rs**: 다운로드 → 검증 → 해제 → 오버레이 → 버전 기록 → 정리 → 네이티브 재빌드
//! - **error.rs**: 에러 분류, 심각도, 재시도 전략
//!
//! ## 원격 레이아웃
//! ```text
//! {base_url}/version.json                          {"version": "v1.0.2", "sha256": "..."}
//! {base_url}/versions/v1.0.2/ScreenSaver.zip
//! ```

pub mod archive;
pub mod checker;
pub mod error;
pub mod native;
pub mod overlay;
pub mod pipeline;
pub mod remote;
pub mod store;
pub mod version;


pub use checker::{UpdateCheckResult, UpdateChecker};
pub use error::{ErrorContext, RecoveryStrategy, Severity, UpdaterError};
pub use native::{NativeBuildConfig, NativeBuildReport};
pub use pipeline::{ApplyError, ApplyPhase, ApplyProgress, ApplyReport, UpdatePipeline};
pub use remote::{RemoteDescriptor, UpdateSource};
pub use store::{VersionRecord, VersionStore};
pub use version::{is_valid_version, SemVer, Version, FLOOR_VERSION};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 업데이트 설정 (`config/settings.toml`의 `[update]` 섹션)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// 디스크립터와 `versions/` 디렉터리가 있는 URL
    pub base_url: String,
    pub descriptor_file: String,
    pub archive_name: String,
    /// 설치 루트. 없으면 실행 파일이 있는 디렉터리
    pub install_root: Option<String>,
    /// 스테이징 디렉터리. 없으면 `<data_dir>/updates`
    pub staging_dir: Option<String>,
    /// 설치 루트 기준 상대 경로 (절대 경로도 허용)
    pub version_file: String,
    pub request_timeout_secs: u64,
    /// 다운로드 단계 재시도 횟수
    pub fetch_retries: u32,
    /// 내려받을 아카이브의 최대 크기 (바이트)
    pub max_archive_bytes: u64,
    /// 압축 해제된 전체 크기 상한 (바이트)
    pub max_extracted_bytes: u64,
    pub native: NativeBuildConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_url: "https://raw.githubusercontent.com/ProPythonCoderAya/ScreenSaver/main/update"
                .to_string(),
            descriptor_file: "version.json".to_string(),
            archive_name: "ScreenSaver.zip".to_string(),
            install_root: None,
            staging_dir: None,
            version_file: "version.json".to_string(),
            request_timeout_secs: 30,
            fetch_retries: 2,
            max_archive_bytes: 256 * 1024 * 1024,
            max_extracted_bytes: 1024 * 1024 * 1024,
            native: NativeBuildConfig::default(),
        }
    }
}

impl UpdateConfig {
    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|p| p.parent().map(|d| d.to_path_buf()))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("updates"))
    }

    pub fn version_file_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.version_file);
        if path.is_absolute() {
            path
        } else {
            self.install_root().join(path)
        }
    }
}

/// 로그, 스테이징 등 사용자별 데이터 디렉터리
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .map(|appdata| PathBuf::from(appdata).join("screensaver"))
            .unwrap_or_else(|_| PathBuf::from("."))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".screensaver"))
            .unwrap_or_else(|_| PathBuf::from("."))
    }
}

impl UpdateChecker {
    pub fn from_config(config: &UpdateConfig) -> Result<Self, UpdaterError> {
        Ok(Self::new(
            VersionStore::new(config.version_file_path()),
            UpdateSource::new(config)?,
        ))
    }
}
