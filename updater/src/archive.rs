//! 업데이트 패키지 검증 및 스테이징 디렉터리 압축 해제

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::UpdaterError;

/// 업데이트 패키지를 풀어두는 격리 디렉터리. 라이브 설치 트리와 분리됨
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// `staging_dir/<uuid>` 생성
    pub fn create(staging_dir: &Path) -> Result<Self, UpdaterError> {
        let root = staging_dir.join(format!("staging-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root)
            .map_err(|e| UpdaterError::from_io(&e, "create staging dir", &root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 상대 경로의 파일이 패키지에 포함됐는지
    pub fn contains(&self, relative: &Path) -> bool {
        self.root.join(relative).is_file()
    }

    pub fn discard(self) -> Result<(), UpdaterError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .map_err(|e| UpdaterError::from_io(&e, "remove staging dir", &self.root))?;
        }
        Ok(())
    }
}

/// 디스크립터에 해시가 있을 때만 호출
pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<(), UpdaterError> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(UpdaterError::CorruptPackage {
            message: format!("sha256 mismatch: expected {}, got {}", expected.trim(), actual),
        })
    }
}

fn corrupt(err: impl std::fmt::Display) -> UpdaterError {
    UpdaterError::CorruptPackage { message: err.to_string() }
}

/// zip 바이트를 스테이징 디렉터리에 해제하고 파일 수를 반환
///
/// 해제된 전체 크기가 `max_bytes`를 넘으면 `CorruptPackage`
pub fn extract_zip(
    bytes: &[u8],
    staging: &StagingArea,
    max_bytes: u64,
) -> Result<usize, UpdaterError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let mut files = 0;
    let mut remaining = max_bytes;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        // 설치 루트 밖으로 나가는 경로(zip-slip) 차단
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| corrupt(format!("entry escapes staging root: {}", entry.name())))?;
        let out_path = staging.root().join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| UpdaterError::from_io(&e, "create staged dir", &out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UpdaterError::from_io(&e, "create staged dir", parent))?;
        }

        if entry.size() > remaining {
            return Err(corrupt(format!(
                "entry {} declares {} bytes, exceeds extraction limit",
                entry.name(),
                entry.size()
            )));
        }
        let name = entry.name().to_string();
        let mut file = std::fs::File::create(&out_path)
            .map_err(|e| UpdaterError::from_io(&e, "write staged file", &out_path))?;
        // 선언된 크기는 믿지 않고 실제로 읽은 양으로 판단
        let written = std::io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut file)
            .map_err(corrupt)?;
        if written > remaining {
            return Err(corrupt(format!("entry {} exceeds extraction limit", name)));
        }
        remaining -= written;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| UpdaterError::from_io(&e, "set staged file mode", &out_path))?;
        }

        files += 1;
    }

    if files == 0 {
        return Err(corrupt("package contains no files"));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LIMIT: u64 = 1024 * 1024;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(dir.path()).unwrap();
        let zip = build_zip(&[("main.py", "print()"), ("Resources/matrix.py", "rain")]);

        assert_eq!(extract_zip(&zip, &staging, LIMIT).unwrap(), 2);
        assert!(staging.contains(Path::new("Resources/matrix.py")));
        assert_eq!(std::fs::read(staging.root().join("main.py")).unwrap(), b"print()");
    }

    #[test]
    fn garbage_is_corrupt_package() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(dir.path()).unwrap();
        let err = extract_zip(b"definitely not a zip file", &staging, LIMIT).unwrap_err();
        assert!(matches!(err, UpdaterError::CorruptPackage { .. }));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(&dir.path().join("stage")).unwrap();
        let zip = build_zip(&[("../escape.txt", "x")]);

        let err = extract_zip(&zip, &staging, LIMIT).unwrap_err();
        assert!(matches!(err, UpdaterError::CorruptPackage { .. }));
        assert!(!dir.path().join("stage/escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn empty_package_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(dir.path()).unwrap();
        assert!(extract_zip(&build_zip(&[]), &staging, LIMIT).is_err());
    }

    #[test]
    fn extraction_stops_at_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(dir.path()).unwrap();
        let big = "x".repeat(4096);
        let zip = build_zip(&[("small.txt", "ok"), ("big.bin", &big)]);

        let err = extract_zip(&zip, &staging, 1024).unwrap_err();
        assert!(matches!(err, UpdaterError::CorruptPackage { .. }));

        // the limit covers the whole package, not each entry
        let zip = build_zip(&[("a.bin", &big[..600]), ("b.bin", &big[..600])]);
        let staging = StagingArea::create(dir.path()).unwrap();
        assert!(extract_zip(&zip, &staging, 1024).is_err());
        let staging = StagingArea::create(dir.path()).unwrap();
        assert_eq!(extract_zip(&zip, &staging, 1200).unwrap(), 2);
    }

    #[test]
    fn discard_removes_staging_root() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::create(dir.path()).unwrap();
        let root = staging.root().to_path_buf();
        extract_zip(&build_zip(&[("a.txt", "a")]), &staging, LIMIT).unwrap();
        staging.discard().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn sha256_verification() {
        let data = b"hello";
        let good = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_sha256(data, good).is_ok());
        assert!(verify_sha256(data, &good.to_uppercase()).is_ok());
        assert!(matches!(
            verify_sha256(data, "00ff").unwrap_err(),
            UpdaterError::CorruptPackage { .. }
        ));
    }
}
