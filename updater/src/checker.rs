//! 업데이트 확인
//!
//! 원격 버전과 로컬 버전을 **문자열 일치**로 비교합니다.
//! "원격이 더 새로운가"가 아니라 "다른가"를 판정하므로,
//! 원격이 더 낮아도 `UpdateAvailable`을 반환합니다(경고 로그만 남김).

use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, UpdaterError};
use crate::remote::UpdateSource;
use crate::store::VersionStore;
use crate::version::Version;

/// 매 확인마다 새로 생성되며 저장되지 않는 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateCheckResult {
    NoUpdate {
        current: Version,
    },
    UpdateAvailable {
        current: Version,
        remote_version: Version,
        /// 디스크립터에 해시가 있으면 적용 단계에서 검증
        sha256: Option<String>,
    },
    CheckFailed {
        reason: String,
        error: Option<UpdaterError>,
    },
}

impl UpdateCheckResult {
    pub fn is_update_available(&self) -> bool {
        matches!(self, UpdateCheckResult::UpdateAvailable { .. })
    }

    fn failed(error: UpdaterError) -> Self {
        UpdateCheckResult::CheckFailed {
            reason: error.user_message(),
            error: Some(error),
        }
    }
}

pub struct UpdateChecker {
    store: VersionStore,
    source: UpdateSource,
}

impl UpdateChecker {
    pub fn new(store: VersionStore, source: UpdateSource) -> Self {
        Self { store, source }
    }

    pub async fn check(&self) -> UpdateCheckResult {
        let current = match self.store.read_or_init() {
            Ok(v) => v,
            Err(e) => {
                ErrorContext::new("read local version", e.clone()).log();
                return UpdateCheckResult::failed(e);
            }
        };

        let descriptor = match self.source.fetch_descriptor().await {
            Ok(d) => d,
            Err(e) => {
                ErrorContext::new("check for updates", e.clone()).log();
                return UpdateCheckResult::failed(e);
            }
        };

        let remote = match Version::parse(&descriptor.version) {
            Ok(v) => v,
            Err(e) => {
                ErrorContext::new("validate remote version", e.clone()).log();
                return UpdateCheckResult::failed(e);
            }
        };

        if remote == current {
            tracing::info!("[Updater] Up to date ({})", current);
            return UpdateCheckResult::NoUpdate { current };
        }

        if let (Some(r), Some(l)) = (remote.semver(), current.semver()) {
            if l.is_newer_than(&r) {
                tracing::warn!(
                    "[Updater] Remote version {} is older than local {}; offering it anyway",
                    remote,
                    current
                );
            }
        }

        tracing::info!("[Updater] Update available: {} -> {}", current, remote);
        UpdateCheckResult::UpdateAvailable {
            current,
            remote_version: remote,
            sha256: descriptor.sha256,
        }
    }
}
