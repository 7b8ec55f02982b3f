use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use screensaver_core::config::{Settings, DEFAULT_SETTINGS_PATH};
use screensaver_core::supervisor::{StopReason, SupervisorEvent};
use screensaver_core::{logging, AudioActivityProbe, Orchestrator};
use screensaver_updater_lib::UpdateCheckResult;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

#[derive(Parser, Debug)]
#[command(name = "screensaver-core", about = "ScreenSaver workload supervisor and updater")]
struct Args {
    /// Settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Skip the update check at startup
    #[arg(long)]
    no_update_check: bool,

    /// Start the workload immediately
    #[arg(long)]
    run: bool,
}

type Input = Lines<BufReader<Stdin>>;

const HELP: &str = "commands: run | stop | status | timeout <minutes> | check | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(Some(&screensaver_updater_lib::data_dir().join("log.log")))?;
    tracing::info!("ScreenSaver core starting");

    let settings = Settings::load(&args.config);
    let orchestrator = Arc::new(Orchestrator::new(settings)?);

    spawn_event_printer(&orchestrator);

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if !args.no_update_check {
        check_and_prompt(&orchestrator, &mut input).await;
    }
    if args.run {
        orchestrator.on_start_requested();
    }

    println!("{}", HELP);
    loop {
        prompt("> ").await;
        let line = tokio::select! {
            line = input.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            // stdin closed
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        };

        let mut words = line.split_whitespace();
        match words.next() {
            Some("run") => {
                if !orchestrator.on_start_requested() {
                    println!("already running");
                }
            }
            Some("stop") => {
                if let Err(e) = orchestrator.on_stop_requested().await {
                    println!("stop failed [{}]: {}", e.error_code(), e);
                }
            }
            Some("status") => print_status(&orchestrator),
            Some("timeout") => match words.next().map(str::parse::<u64>) {
                Some(Ok(minutes)) if minutes > 0 => match orchestrator.set_timeout_minutes(minutes) {
                    Ok(cfg) => println!("timeout set to {} minute(s); applies on next run", cfg.timeout_minutes()),
                    Err(e) => println!("failed to save timeout: {:#}", e),
                },
                _ => println!("usage: timeout <minutes>"),
            },
            Some("check") => check_and_prompt(&orchestrator, &mut input).await,
            Some("quit") | Some("exit") => break,
            Some(_) => println!("{}", HELP),
            None => {}
        }
    }

    orchestrator.shutdown().await;
    tracing::info!("ScreenSaver core shutting down");
    Ok(())
}

async fn prompt(text: &str) {
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(text.as_bytes()).await;
    let _ = stdout.flush().await;
}

fn print_status(orchestrator: &Orchestrator) {
    let supervisor = orchestrator.supervisor();
    println!("workload: {:?} (spawned {} time(s))", supervisor.state(), supervisor.spawn_count());
    match orchestrator.last_check() {
        Some(UpdateCheckResult::NoUpdate { current }) => println!("version: {} (up to date)", current),
        Some(UpdateCheckResult::UpdateAvailable { current, remote_version, .. }) => {
            println!("version: {} ({} available)", current, remote_version)
        }
        Some(UpdateCheckResult::CheckFailed { reason, .. }) => println!("update check failed: {}", reason),
        None => println!("update check: not run"),
    }
    let audio = orchestrator.audio_capability();
    println!(
        "audio probe: {} (playing: {})",
        if audio.is_available() { "loaded" } else { "unavailable" },
        audio.is_audio_playing()
    );
}

async fn check_and_prompt(orchestrator: &Orchestrator, input: &mut Input) {
    match orchestrator.check_for_updates().await {
        UpdateCheckResult::UpdateAvailable { current, remote_version, .. } => {
            prompt(&format!(
                "Update available: {} -> {}. Install now? [y/N] ",
                current, remote_version
            ))
            .await;
            let accepted = matches!(
                input.next_line().await,
                Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y")
            );
            match orchestrator.on_update_confirmed(accepted).await {
                Ok(Some(report)) => println!("✓ Updated to {}", report.version),
                Ok(None) => {}
                Err(e) => println!("✗ {}", e),
            }
        }
        UpdateCheckResult::NoUpdate { current } => println!("Up to date ({})", current),
        UpdateCheckResult::CheckFailed { reason, .. } => println!("Update check failed: {}", reason),
    }
}

/// Prints supervisor notifications as they arrive.
fn spawn_event_printer(orchestrator: &Arc<Orchestrator>) {
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SupervisorEvent::Crashed { exit_code, .. }) => {
                    println!(
                        "\nworkload crashed (exit code {}); Run re-enabled",
                        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
                    );
                }
                Ok(SupervisorEvent::SpawnFailed { error }) => {
                    println!("\nfailed to start workload: {}; Run re-enabled", error);
                }
                Ok(SupervisorEvent::Stopped { reason: StopReason::Requested }) => {
                    println!("\nworkload stopped");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("event printer lagged by {}", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
