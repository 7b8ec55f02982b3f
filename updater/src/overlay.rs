//! 스테이징 트리를 라이브 설치 트리 위에 덮어쓰기
//!
//! 파일 단위로는 임시 파일 + rename으로 교체하므로 잘린 파일이 보이지 않지만,
//! 트리 전체는 트랜잭션이 아닙니다. 중간에 실패하면 일부 파일만 새 버전인
//! 상태로 남으며, 같은 패키지를 다시 적용하면 수렴합니다.

use std::path::{Path, PathBuf};

use crate::error::UpdaterError;

const TEMP_SUFFIX: &str = ".update-tmp";

/// `src` 아래 모든 파일을 `dst`의 같은 상대 경로로 복사. 복사한 파일 수 반환
pub fn overlay_tree(src: &Path, dst: &Path) -> Result<usize, UpdaterError> {
    std::fs::create_dir_all(dst).map_err(|e| UpdaterError::from_io(&e, "create install dir", dst))?;

    let mut copied = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from_dir, to_dir)) = pending.pop() {
        let entries = std::fs::read_dir(&from_dir)
            .map_err(|e| UpdaterError::from_io(&e, "read staged dir", &from_dir))?;

        for entry in entries {
            let entry = entry.map_err(|e| UpdaterError::from_io(&e, "read staged dir", &from_dir))?;
            let path = entry.path();
            let dest = to_dir.join(entry.file_name());

            if path.is_dir() {
                std::fs::create_dir_all(&dest)
                    .map_err(|e| UpdaterError::from_io(&e, "create install dir", &dest))?;
                pending.push((path, dest));
            } else {
                replace_file(&path, &dest)?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

/// 같은 디렉터리의 임시 파일로 복사한 뒤 rename
pub(crate) fn replace_file(from: &Path, to: &Path) -> Result<(), UpdaterError> {
    let mut tmp_name = to.as_os_str().to_owned();
    tmp_name.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    std::fs::copy(from, &tmp).map_err(|e| UpdaterError::from_io(&e, "copy", &tmp))?;
    if let Err(e) = std::fs::rename(&tmp, to) {
        let _ = std::fs::remove_file(&tmp);
        return Err(UpdaterError::from_io(&e, "replace", to));
    }
    tracing::debug!("[Overlay] {}", to.display());
    Ok(())
}
