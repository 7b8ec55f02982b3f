//! 원격 업데이트 소스 HTTP 클라이언트
//!
//! 버전 디스크립터(`{base_url}/{descriptor_file}`)를 가져오고,
//! 버전별 아카이브(`{base_url}/versions/{version}/{archive_name}`)를 다운로드합니다.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::UpdaterError;
use crate::version::Version;
use crate::UpdateConfig;

const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

fn too_large(url: &str, size: u64, limit: u64) -> UpdaterError {
    UpdaterError::ProtocolError {
        status_code: None,
        message: format!("update archive from {} is {} bytes, limit is {}", url, size, limit),
    }
}

/// 원격 버전 디스크립터 (`{"version": "vX.Y.Z"}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    /// 검증 전 원시 문자열
    pub version: String,
    /// 선택: 아카이브 SHA256 해시
    #[serde(default)]
    pub sha256: Option<String>,
}

/// 업데이트 서버 클라이언트
pub struct UpdateSource {
    http: reqwest::Client,
    /// 끝의 '/'가 제거된 베이스 URL
    base_url: String,
    descriptor_file: String,
    archive_name: String,
    max_archive_bytes: u64,
    timeout: Duration,
}

impl UpdateSource {
    pub fn new(config: &UpdateConfig) -> Result<Self, UpdaterError> {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .user_agent(concat!("screensaver-updater/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| UpdaterError::NetworkError {
                message: format!("failed to create HTTP client: {}", e),
                recoverable: false,
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            descriptor_file: config.descriptor_file.trim_start_matches('/').to_string(),
            archive_name: config.archive_name.clone(),
            max_archive_bytes: config.max_archive_bytes,
            timeout,
        })
    }

    pub fn descriptor_url(&self) -> String {
        format!("{}/{}", self.base_url, self.descriptor_file)
    }

    /// 검증된 버전만 받으므로 URL에 임의 경로가 섞이지 않음
    pub fn archive_url(&self, version: &Version) -> String {
        format!("{}/versions/{}/{}", self.base_url, version, self.archive_name)
    }

    /// 원격 버전 디스크립터 가져오기
    pub async fn fetch_descriptor(&self) -> Result<RemoteDescriptor, UpdaterError> {
        let url = self.descriptor_url();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "fetch version descriptor", self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::ProtocolError {
                status_code: Some(status.as_u16()),
                message: format!("Error while fetching from {}", url),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "read version descriptor", self.timeout))?;

        serde_json::from_slice(&body).map_err(|e| UpdaterError::ProtocolError {
            status_code: None,
            message: format!("malformed version descriptor: {}", e),
        })
    }

    /// 아카이브 다운로드 → Vec<u8> (스트리밍, 진행률 콜백)
    pub async fn download_archive<F>(
        &self,
        version: &Version,
        mut on_progress: F,
    ) -> Result<Vec<u8>, UpdaterError>
    where
        F: FnMut(u64, Option<u64>),
    {
        let url = self.archive_url(version);
        tracing::info!("[Updater] Downloading update from {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "download update archive", self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::ProtocolError {
                status_code: Some(status.as_u16()),
                message: format!("Failed to get update from {}", url),
            });
        }

        let total = response.content_length();
        if let Some(declared) = total {
            if declared > self.max_archive_bytes {
                return Err(too_large(&url, declared, self.max_archive_bytes));
            }
        }

        // Content-Length는 신뢰할 수 없으므로 사전 할당은 PREALLOC_LIMIT까지만
        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(PREALLOC_LIMIT) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| UpdaterError::from_reqwest(&e, "download update archive", self.timeout))?;
            let received = bytes.len() as u64 + chunk.len() as u64;
            if received > self.max_archive_bytes {
                return Err(too_large(&url, received, self.max_archive_bytes));
            }
            bytes.extend_from_slice(&chunk);
            on_progress(bytes.len() as u64, total);
        }

        tracing::info!("[Updater] Downloaded {} ({} bytes)", self.archive_name, bytes.len());
        Ok(bytes)
    }
}
