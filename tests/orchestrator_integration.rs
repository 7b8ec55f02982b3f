//! Orchestrator flows: start/stop, update confirm with a running workload.
#![cfg(unix)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use screensaver_core::config::Settings;
use screensaver_core::supervisor::{SupervisorEvent, SupervisorState};
use screensaver_core::Orchestrator;
use screensaver_updater_lib::{UpdateCheckResult, Version, VersionStore};
use tokio::sync::broadcast;

struct Package {
    descriptor: String,
    archive: Vec<u8>,
}

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn serve(package: Package) -> String {
    let package = Arc::new(package);
    let app = Router::new()
        .route(
            "/version.json",
            get(|State(p): State<Arc<Package>>| async move { p.descriptor.clone() }),
        )
        .route(
            "/versions/v1.0.1/ScreenSaver.zip",
            get(|State(p): State<Arc<Package>>| async move {
                (StatusCode::OK, p.archive.clone()).into_response()
            }),
        )
        .with_state(package);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn settings(base_url: &str, install: &Path, staging: &Path, script: &str) -> Settings {
    let mut settings = Settings::default();
    settings.update.base_url = base_url.to_string();
    settings.update.install_root = Some(install.display().to_string());
    settings.update.staging_dir = Some(staging.display().to_string());
    settings.update.request_timeout_secs = 5;
    settings.update.fetch_retries = 0;
    settings.update.native.enabled = false;
    settings.workload.program = "sh".to_string();
    settings.workload.args = vec!["-c".to_string(), script.to_string()];
    settings.workload.stop_grace_secs = 1;
    settings
}

async fn next_output(rx: &mut broadcast::Receiver<SupervisorEvent>) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(SupervisorEvent::Output(line)) => return line.content,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("no workload output")
}

#[tokio::test]
async fn start_passes_timeout_minutes_and_stop_is_idempotent() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(install.path().join("config.json"), r#"{"timeout": 300}"#).unwrap();

    // with `sh -c`, the appended minutes argument becomes $0
    let orch = Orchestrator::new(settings(
        "http://127.0.0.1:1",
        install.path(),
        staging.path(),
        "echo \"minutes=$0\"; exec sleep 30",
    ))
    .unwrap();
    let mut events = orch.subscribe();

    // stop before anything runs is a no-op
    orch.on_stop_requested().await.unwrap();

    assert!(orch.on_start_requested());
    assert!(!orch.on_start_requested());
    assert_eq!(next_output(&mut events).await, "minutes=5");
    assert_eq!(orch.state(), SupervisorState::Running);

    orch.on_stop_requested().await.unwrap();
    assert_eq!(orch.state(), SupervisorState::Idle);
    orch.on_stop_requested().await.unwrap();
}

#[tokio::test]
async fn timeout_change_applies_on_next_start() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let orch = Orchestrator::new(settings(
        "http://127.0.0.1:1",
        install.path(),
        staging.path(),
        "echo \"minutes=$0\"; exec sleep 30",
    ))
    .unwrap();
    let mut events = orch.subscribe();

    orch.set_timeout_minutes(12).unwrap();
    assert!(orch.on_start_requested());
    assert_eq!(next_output(&mut events).await, "minutes=12");
    orch.shutdown().await;
}

#[tokio::test]
async fn oversized_timeout_is_rejected_and_not_saved() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(install.path().join("config.json"), r#"{"timeout": 300}"#).unwrap();
    let orch = Orchestrator::new(settings(
        "http://127.0.0.1:1",
        install.path(),
        staging.path(),
        "exit 0",
    ))
    .unwrap();

    assert!(orch.set_timeout_minutes(307_445_734_561_825_861).is_err());
    assert_eq!(
        std::fs::read_to_string(install.path().join("config.json")).unwrap(),
        r#"{"timeout": 300}"#
    );
}

#[tokio::test]
async fn configured_env_reaches_workload() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let mut settings = settings(
        "http://127.0.0.1:1",
        install.path(),
        staging.path(),
        "echo \"mode=$SCREENSAVER_MODE\"; exec sleep 30",
    );
    settings
        .workload
        .env
        .insert("SCREENSAVER_MODE".to_string(), "matrix".to_string());
    let orch = Orchestrator::new(settings).unwrap();
    let mut events = orch.subscribe();

    assert!(orch.on_start_requested());
    assert_eq!(next_output(&mut events).await, "mode=matrix");
    orch.shutdown().await;
}

#[tokio::test]
async fn failed_check_leaves_nothing_to_apply() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let orch = Orchestrator::new(settings(
        "http://127.0.0.1:1",
        install.path(),
        staging.path(),
        "exit 0",
    ))
    .unwrap();

    assert!(matches!(
        orch.check_for_updates().await,
        UpdateCheckResult::CheckFailed { .. }
    ));
    assert!(orch.on_update_confirmed(true).await.unwrap().is_none());
    assert!(!orch.audio_capability().is_available());
}

#[tokio::test]
async fn confirmed_update_stops_workload_and_applies() {
    let install = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    std::fs::write(install.path().join("version.json"), r#"{"version": "v1.0.0"}"#).unwrap();
    std::fs::write(install.path().join("main.py"), "old").unwrap();

    let url = serve(Package {
        descriptor: r#"{"version": "v1.0.1"}"#.to_string(),
        archive: build_zip(&[("main.py", "new"), ("Resources/matrix.py", "rain")]),
    })
    .await;

    let orch = Orchestrator::new(settings(&url, install.path(), staging.path(), "exec sleep 30"))
        .unwrap();
    assert!(orch.on_start_requested());

    let result = orch.check_for_updates().await;
    assert!(result.is_update_available());

    // declining keeps the offer
    assert!(orch.on_update_confirmed(false).await.unwrap().is_none());
    assert_eq!(orch.state(), SupervisorState::Running);

    let report = orch.on_update_confirmed(true).await.unwrap().unwrap();
    assert_eq!(report.version, Version::parse("v1.0.1").unwrap());
    assert_eq!(orch.state(), SupervisorState::Idle);
    assert_eq!(std::fs::read_to_string(install.path().join("main.py")).unwrap(), "new");
    assert_eq!(
        VersionStore::new(install.path().join("version.json"))
            .read_or_init()
            .unwrap()
            .as_str(),
        "v1.0.1"
    );
    assert!(matches!(
        orch.last_check(),
        Some(UpdateCheckResult::NoUpdate { .. })
    ));

    // nothing left to apply
    assert!(orch.on_update_confirmed(true).await.unwrap().is_none());
}
