//! 네이티브 오디오 감지 컴포넌트 재빌드
//!
//! 패키지에 C 소스가 포함된 경우에만 실행됩니다.
//! 1. 이전 빌드 디렉터리 삭제 후 재생성
//! 2. 플랫폼 툴체인으로 공유 라이브러리 빌드
//! 3. 실행 중인 프로세스가 로드하는 위치(설치 루트)로 복사
//!
//! 실패해도 앞선 단계(오버레이, 버전 기록)는 되돌리지 않습니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::UpdaterError;
use crate::overlay::replace_file;

#[cfg(target_os = "macos")]
const DEFAULT_ARTIFACT: &str = "libaudioutil.dylib";
#[cfg(target_os = "windows")]
const DEFAULT_ARTIFACT: &str = "audioutil.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const DEFAULT_ARTIFACT: &str = "libaudioutil.so";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeBuildConfig {
    pub enabled: bool,
    /// 설치 루트 기준 C 소스 경로
    pub source: String,
    /// 설치 루트 기준 빌드 출력 디렉터리
    pub dist_dir: String,
    /// None이면 플랫폼 기본값
    pub artifact: Option<String>,
    /// None이면 플랫폼 기본 컴파일러 (macOS: clang, 그 외 unix: cc)
    pub compiler: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for NativeBuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: "C/src/main.c".to_string(),
            dist_dir: "C/dist".to_string(),
            artifact: None,
            compiler: None,
            extra_args: Vec::new(),
        }
    }
}

impl NativeBuildConfig {
    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(DEFAULT_ARTIFACT)
    }

    /// `(컴파일러, 소스 앞 플래그, 소스 뒤 플래그)`. 지원하지 않는 플랫폼이면 None
    fn toolchain(&self) -> Option<(String, Vec<String>, Vec<String>)> {
        #[allow(dead_code)]
        fn owned(flags: &[&str]) -> Vec<String> {
            flags.iter().map(|s| s.to_string()).collect()
        }

        #[cfg(target_os = "macos")]
        let platform = Some(("clang", owned(&["-dynamiclib"]), owned(&["-framework", "CoreAudio"])));
        #[cfg(all(unix, not(target_os = "macos")))]
        let platform = Some(("cc", owned(&["-shared", "-fPIC"]), Vec::new()));
        #[cfg(not(unix))]
        let platform: Option<(&str, Vec<String>, Vec<String>)> = None;

        match (&self.compiler, platform) {
            (Some(compiler), Some((_, pre, post))) => Some((compiler.clone(), pre, post)),
            (Some(compiler), None) => Some((compiler.clone(), Vec::new(), Vec::new())),
            (None, Some((default, pre, post))) => Some((default.to_string(), pre, post)),
            (None, None) => None,
        }
    }
}

/// 재빌드 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeBuildReport {
    /// 프로세스가 로드하는 최종 위치
    pub deployed_to: PathBuf,
}

pub struct NativeBuilder<'a> {
    config: &'a NativeBuildConfig,
    install_root: &'a Path,
}

impl<'a> NativeBuilder<'a> {
    pub fn new(config: &'a NativeBuildConfig, install_root: &'a Path) -> Self {
        Self { config, install_root }
    }

    pub fn source_path(&self) -> PathBuf {
        self.install_root.join(&self.config.source)
    }

    pub async fn rebuild(&self) -> Result<NativeBuildReport, UpdaterError> {
        let source = self.source_path();
        if !source.is_file() {
            return Err(UpdaterError::ToolchainError {
                command: "locate source".to_string(),
                message: format!("{} not found", source.display()),
            });
        }

        let (compiler, pre, post) = self.config.toolchain().ok_or_else(|| UpdaterError::ToolchainError {
            command: "select toolchain".to_string(),
            message: "no native toolchain configured for this platform".to_string(),
        })?;

        let dist = self.install_root.join(&self.config.dist_dir);
        if dist.exists() {
            std::fs::remove_dir_all(&dist).map_err(|e| UpdaterError::from_io(&e, "remove dist dir", &dist))?;
        }
        std::fs::create_dir_all(&dist).map_err(|e| UpdaterError::from_io(&e, "create dist dir", &dist))?;

        let artifact = self.config.artifact_name();
        let built = dist.join(artifact);

        let mut cmd = Command::new(&compiler);
        cmd.args(&pre)
            .arg(&source)
            .args(&post)
            .args(&self.config.extra_args)
            .arg("-o")
            .arg(&built)
            .current_dir(self.install_root)
            .stdin(std::process::Stdio::null());

        let command_line = format!("{} ... -o {}", compiler, built.display());
        tracing::info!("[Native] Building {} with {}", artifact, compiler);

        let output = cmd.output().await.map_err(|e| UpdaterError::ToolchainError {
            command: command_line.clone(),
            message: format!("failed to run compiler: {}", e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdaterError::ToolchainError {
                command: command_line,
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        if !built.is_file() {
            return Err(UpdaterError::ToolchainError {
                command: command_line,
                message: format!("compiler succeeded but {} is missing", built.display()),
            });
        }

        let deployed_to = self.install_root.join(artifact);
        replace_file(&built, &deployed_to)?;
        tracing::info!("[Native] Deployed {}", deployed_to.display());

        Ok(NativeBuildReport { deployed_to })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_source(root: &Path) {
        std::fs::create_dir_all(root.join("C/src")).unwrap();
        std::fs::write(root.join("C/src/main.c"), "int is_audio_playing() { return 0; }").unwrap();
    }

    /// 마지막 인자(출력 경로)에 파일을 만드는 가짜 컴파일러
    fn fake_compiler(dir: &Path) -> String {
        let path = dir.join("fakecc.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\nwhile [ \"$#\" -gt 1 ]; do shift; done\necho built > \"$1\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn rebuild_deploys_artifact_and_resets_dist() {
        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        write_source(root.path());
        std::fs::create_dir_all(root.path().join("C/dist")).unwrap();
        std::fs::write(root.path().join("C/dist/stale.o"), "old").unwrap();

        let config = NativeBuildConfig {
            compiler: Some(fake_compiler(tools.path())),
            artifact: Some("libprobe.so".to_string()),
            ..NativeBuildConfig::default()
        };
        let report = NativeBuilder::new(&config, root.path()).rebuild().await.unwrap();

        assert_eq!(report.deployed_to, root.path().join("libprobe.so"));
        assert_eq!(std::fs::read_to_string(&report.deployed_to).unwrap().trim(), "built");
        assert!(!root.path().join("C/dist/stale.o").exists());
    }

    #[tokio::test]
    async fn failing_compiler_is_toolchain_error() {
        let root = tempfile::tempdir().unwrap();
        write_source(root.path());
        let config = NativeBuildConfig {
            compiler: Some("false".to_string()),
            ..NativeBuildConfig::default()
        };

        let err = NativeBuilder::new(&config, root.path()).rebuild().await.unwrap_err();
        assert!(matches!(err, UpdaterError::ToolchainError { .. }));
    }

    #[tokio::test]
    async fn missing_compiler_is_toolchain_error() {
        let root = tempfile::tempdir().unwrap();
        write_source(root.path());
        let config = NativeBuildConfig {
            compiler: Some("/nonexistent/compiler-binary".to_string()),
            ..NativeBuildConfig::default()
        };

        let err = NativeBuilder::new(&config, root.path()).rebuild().await.unwrap_err();
        assert!(matches!(err, UpdaterError::ToolchainError { .. }));
    }
}
