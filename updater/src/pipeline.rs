//! 업데이트 적용 파이프라인
//!
//! ## 단계
//! 1. 다운로드 (실패해도 상태 변경 없음, 재시도 안전)
//! 2. 체크섬 검증 (디스크립터에 해시가 있을 때)
//! 3. 스테이징 디렉터리에 압축 해제 (실패 시 스테이징 삭제, 라이브 트리 무변경)
//! 4. 오버레이 (트랜잭션 아님)
//! 5. 버전 기록
//! 6. 스테이징 정리
//! 7. 네이티브 컴포넌트 재빌드 (패키지에 소스가 있을 때만)
//!
//! 완료된 단계는 자동으로 되돌리지 않습니다. `apply`가 실패하면 설치 상태는
//! 알 수 없는 것으로 보고 같은 버전으로 다시 적용해야 합니다.
//! 오버레이는 항상 덮어쓰므로 재적용은 멱등입니다.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::archive::{extract_zip, verify_sha256, StagingArea};
use crate::error::{ErrorContext, RecoveryStrategy, UpdaterError};
use crate::native::{NativeBuildReport, NativeBuilder};
use crate::overlay::overlay_tree;
use crate::remote::UpdateSource;
use crate::store::VersionStore;
use crate::version::Version;
use crate::UpdateConfig;

/// 적용 단계
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    Preparing,
    Fetching,
    Verifying,
    Extracting,
    Overlaying,
    CommittingVersion,
    CleaningStaging,
    RebuildingNative,
    Completed,
    Failed,
}

/// 적용 진행 상태 (UI 표시용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyProgress {
    pub phase: ApplyPhase,
    pub version: String,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub message: String,
}

/// 실패한 단계와 원인
#[derive(Debug, Clone)]
pub struct ApplyError {
    pub phase: ApplyPhase,
    pub error: UpdaterError,
}

impl ApplyError {
    /// 라이브 설치 트리가 바뀌었을 수 있는지
    pub fn installation_touched(&self) -> bool {
        matches!(
            self.phase,
            ApplyPhase::Overlaying
                | ApplyPhase::CommittingVersion
                | ApplyPhase::CleaningStaging
                | ApplyPhase::RebuildingNative
        )
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update failed while {:?}: {}", self.phase, self.error)
    }
}

impl std::error::Error for ApplyError {}

/// 성공한 적용 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub version: Version,
    pub files_overlaid: usize,
    pub native: Option<NativeBuildReport>,
    pub applied_at: String,
}

pub struct UpdatePipeline {
    config: UpdateConfig,
    source: UpdateSource,
    store: VersionStore,
    progress: watch::Sender<Option<ApplyProgress>>,
}

impl UpdatePipeline {
    pub fn new(config: UpdateConfig) -> Result<Self, UpdaterError> {
        let source = UpdateSource::new(&config)?;
        let store = VersionStore::new(config.version_file_path());
        let (progress, _) = watch::channel(None);
        Ok(Self { config, source, store, progress })
    }

    /// 진행 상태 구독
    pub fn subscribe(&self) -> watch::Receiver<Option<ApplyProgress>> {
        self.progress.subscribe()
    }

    pub fn current_progress(&self) -> Option<ApplyProgress> {
        self.progress.borrow().clone()
    }

    pub async fn apply(&self, version: &Version) -> Result<ApplyReport, ApplyError> {
        self.apply_with_checksum(version, None).await
    }

    pub async fn apply_with_checksum(
        &self,
        version: &Version,
        sha256: Option<&str>,
    ) -> Result<ApplyReport, ApplyError> {
        let install_root = self.config.install_root();
        self.report(version, ApplyPhase::Preparing, "Preparing update...");

        // 1. 다운로드
        let bytes = self.fetch(version).await.map_err(|e| self.fail(version, ApplyPhase::Fetching, e))?;

        // 2. 검증
        if let Some(expected) = sha256 {
            self.report(version, ApplyPhase::Verifying, "Verifying package checksum...");
            verify_sha256(&bytes, expected).map_err(|e| self.fail(version, ApplyPhase::Verifying, e))?;
        }

        // 3. 압축 해제
        self.report(version, ApplyPhase::Extracting, "Extracting update...");
        let staging = StagingArea::create(&self.config.staging_dir())
            .map_err(|e| self.fail(version, ApplyPhase::Extracting, e))?;
        if let Err(e) = extract_zip(&bytes, &staging, self.config.max_extracted_bytes) {
            if let Err(cleanup) = staging.discard() {
                tracing::warn!("[Updater] Failed to discard staging area: {}", cleanup);
            }
            return Err(self.fail(version, ApplyPhase::Extracting, e));
        }
        tracing::info!("[Updater] Extracted update to {}", staging.root().display());

        let native = &self.config.native;
        let rebuild_native = native.enabled && staging.contains(Path::new(&native.source));

        // 4. 오버레이
        self.report(version, ApplyPhase::Overlaying, "Applying update...");
        let files_overlaid = match overlay_tree(staging.root(), &install_root) {
            Ok(n) => n,
            Err(e) => {
                if let Err(cleanup) = staging.discard() {
                    tracing::warn!("[Updater] Failed to discard staging area: {}", cleanup);
                }
                return Err(self.fail(version, ApplyPhase::Overlaying, e));
            }
        };

        // 5. 버전 기록 (오버레이가 끝난 뒤에만)
        self.report(version, ApplyPhase::CommittingVersion, "Recording new version...");
        if let Err(e) = self.store.write(version) {
            if let Err(cleanup) = staging.discard() {
                tracing::warn!("[Updater] Failed to discard staging area: {}", cleanup);
            }
            return Err(self.fail(version, ApplyPhase::CommittingVersion, e));
        }

        // 6. 스테이징 정리
        self.report(version, ApplyPhase::CleaningStaging, "Cleaning up...");
        staging
            .discard()
            .map_err(|e| self.fail(version, ApplyPhase::CleaningStaging, e))?;

        // 7. 네이티브 재빌드
        let native_report = if rebuild_native {
            self.report(version, ApplyPhase::RebuildingNative, "Rebuilding audio helper...");
            let report = NativeBuilder::new(native, &install_root)
                .rebuild()
                .await
                .map_err(|e| self.fail(version, ApplyPhase::RebuildingNative, e))?;
            Some(report)
        } else {
            None
        };

        self.report(version, ApplyPhase::Completed, "Update applied successfully!");
        tracing::info!(
            "[Updater] Update {} applied successfully ({} files)",
            version,
            files_overlaid
        );

        Ok(ApplyReport {
            version: version.clone(),
            files_overlaid,
            native: native_report,
            applied_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// 다운로드 단계만 재시도 (부작용 없음)
    async fn fetch(&self, version: &Version) -> Result<Vec<u8>, UpdaterError> {
        self.report(version, ApplyPhase::Fetching, "Downloading update...");
        let mut strategy = RecoveryStrategy::new(self.config.fetch_retries);

        loop {
            let result = self
                .source
                .download_archive(version, |downloaded, total| {
                    self.progress.send_modify(|p| {
                        if let Some(p) = p.as_mut() {
                            p.downloaded_bytes = downloaded;
                            p.total_bytes = total;
                        }
                    });
                })
                .await;

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) if strategy.should_retry(&e) => {
                    let delay = strategy.next_delay(&e);
                    strategy.increment();
                    tracing::warn!(
                        "[Updater] Download failed ({}), retry {}/{} in {:?}",
                        e,
                        strategy.current_attempt,
                        strategy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report(&self, version: &Version, phase: ApplyPhase, message: &str) {
        self.progress.send_modify(|p| {
            let (downloaded_bytes, total_bytes) = p
                .as_ref()
                .filter(|prev| phase != ApplyPhase::Preparing && prev.version == version.as_str())
                .map(|prev| (prev.downloaded_bytes, prev.total_bytes))
                .unwrap_or((0, None));
            *p = Some(ApplyProgress {
                phase,
                version: version.to_string(),
                downloaded_bytes,
                total_bytes,
                message: message.to_string(),
            });
        });
    }

    fn fail(&self, version: &Version, phase: ApplyPhase, error: UpdaterError) -> ApplyError {
        ErrorContext::new(&format!("apply {} ({:?})", version, phase), error.clone()).log();
        self.progress.send_modify(|p| {
            if let Some(p) = p.as_mut() {
                p.phase = ApplyPhase::Failed;
                p.message = error.user_message();
            }
        });
        ApplyError { phase, error }
    }
}
