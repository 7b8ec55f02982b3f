//! 독립 실행 업데이터
//!
//! ```text
//! screensaver-updater -v v1.0.2
//! screensaver-updater -v v1.0.2 --install-root /opt/screensaver --sha256 <hex>
//! ```
//!
//! ## 종료 코드
//! - `0` — 적용 성공
//! - `1` — 버전 문자열 오류 또는 파이프라인 실패

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use screensaver_updater_lib::{ApplyReport, UpdateConfig, UpdatePipeline, Version};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "screensaver-updater", about = "Apply a ScreenSaver update package", disable_version_flag = true)]
struct Args {
    /// 적용할 버전 (예: v1.0.2)
    #[arg(short = 'v', long = "version")]
    version: String,

    /// 설정 파일 (`[update]` 섹션만 사용)
    #[arg(long, default_value = "config/settings.toml")]
    config: PathBuf,

    /// 설치 루트 오버라이드
    #[arg(long)]
    install_root: Option<PathBuf>,

    /// 아카이브 SHA256 검증값
    #[arg(long)]
    sha256: Option<String>,
}

#[derive(Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    update: UpdateConfig,
}

fn load_update_config(path: &Path) -> UpdateConfig {
    match std::fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<SettingsFile>(&s) {
            Ok(settings) => settings.update,
            Err(e) => {
                tracing::warn!("[Updater] Ignoring unparsable {}: {}", path.display(), e);
                UpdateConfig::default()
            }
        },
        Err(_) => UpdateConfig::default(),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let version = match Version::parse(&args.version) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("✗ {}", e);
            return ExitCode::from(1);
        }
    };

    let mut config = load_update_config(&args.config);
    if let Some(root) = args.install_root {
        config.install_root = Some(root.display().to_string());
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let result: anyhow::Result<ApplyReport> = runtime.block_on(async move {
        let pipeline = UpdatePipeline::new(config)?;
        let report = pipeline
            .apply_with_checksum(&version, args.sha256.as_deref())
            .await?;
        Ok::<_, anyhow::Error>(report)
    });

    match result {
        Ok(report) => {
            println!("✓ Updated to {} ({} files)", report.version, report.files_overlaid);
            if let Some(native) = report.native {
                println!("  native helper rebuilt: {}", native.deployed_to.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::from(1)
        }
    }
}
