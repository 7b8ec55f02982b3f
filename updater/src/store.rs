//! 로컬 버전 기록 (`version.json`)
//!
//! 파일이 없거나 손상된 경우 최저 버전 `v0.0.0`으로 다시 씁니다.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::UpdaterError;
use crate::version::{is_valid_version, Version};

/// 디스크에 기록되는 형태 (`{"version": "vX.Y.Z"}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
}

pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 로컬 버전을 읽고, 없거나 손상됐으면 최저 버전으로 초기화
    pub fn read_or_init(&self) -> Result<Version, UpdaterError> {
        match self.read_valid() {
            Some(version) => Ok(version),
            None => {
                let floor = Version::floor();
                self.write(&floor)?;
                tracing::info!("[VersionStore] Initialized {} with {}", self.path.display(), floor);
                Ok(floor)
            }
        }
    }

    fn read_valid(&self) -> Option<Version> {
        if !self.path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("[VersionStore] Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };
        let record: VersionRecord = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("[VersionStore] Failed to load local version: {}", e);
                return None;
            }
        };
        if !is_valid_version(&record.version) {
            tracing::warn!("[VersionStore] Local version '{}' is corrupted", record.version);
            return None;
        }
        Version::parse(&record.version).ok()
    }

    /// 임시 파일에 쓴 뒤 rename하여 원자적으로 교체
    pub fn write(&self, version: &Version) -> Result<(), UpdaterError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| UpdaterError::from_io(&e, "create version dir", &dir))?;

        let record = VersionRecord { version: version.as_str().to_string() };
        let json = serde_json::to_string_pretty(&record).map_err(|e| UpdaterError::FileSystemError {
            operation: "serialize version record".to_string(),
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| UpdaterError::from_io(&e, "create temp version file", &dir))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| UpdaterError::from_io(&e, "write version file", tmp.path()))?;
        tmp.persist(&self.path)
            .map_err(|e| UpdaterError::from_io(&e.error, "replace version file", &self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_initialized_with_floor() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("version.json"));

        assert_eq!(store.read_or_init().unwrap().as_str(), "v0.0.0");
        let on_disk: VersionRecord =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk.version, "v0.0.0");
    }

    #[test]
    fn corrupt_values_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        let store = VersionStore::new(&path);

        for garbage in ["not json", "{\"version\": \"1.0\"}", "{\"other\": 1}", "{\"version\": 5}"] {
            std::fs::write(&path, garbage).unwrap();
            assert_eq!(store.read_or_init().unwrap().as_str(), "v0.0.0", "input: {}", garbage);
            assert!(std::fs::read_to_string(&path).unwrap().contains("v0.0.0"));
        }
    }

    #[test]
    fn valid_version_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        std::fs::write(&path, "{\"version\": \"v1.0.2\"}").unwrap();

        let store = VersionStore::new(&path);
        assert_eq!(store.read_or_init().unwrap().as_str(), "v1.0.2");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"version\": \"v1.0.2\"}");
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("nested/deeper/version.json"));
        store.write(&Version::parse("v2.1").unwrap()).unwrap();
        assert_eq!(store.read_or_init().unwrap().as_str(), "v2.1");
    }
}
