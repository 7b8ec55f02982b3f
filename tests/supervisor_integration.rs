//! Supervisor restart-loop behaviour against `sh` stub workloads.
#![cfg(unix)]

use std::time::{Duration, Instant};

use screensaver_core::supervisor::process::pid_alive;
use screensaver_core::supervisor::{
    LogLevel, ProcessSupervisor, StopReason, SupervisorEvent, SupervisorState, WorkloadCommand,
};
use tokio::sync::broadcast;

fn stub(script: &str) -> WorkloadCommand {
    WorkloadCommand::new("sh").args(["-c", script])
}

/// Next event matching `pred`, skipping others.
async fn next_matching<F>(
    rx: &mut broadcast::Receiver<SupervisorEvent>,
    timeout: Duration,
    mut pred: F,
) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

async fn wait_for_spawns(sup: &ProcessSupervisor, n: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while sup.spawn_count() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workload was not respawned");
}

#[tokio::test]
async fn clean_exit_is_respawned_until_stopped() {
    let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(500));
    assert!(sup.start(stub("echo tick; exit 0")));

    // N = 3 natural exits → at least N + 1 spawns
    wait_for_spawns(&sup, 4).await;
    assert_eq!(sup.state(), SupervisorState::Running);

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Idle);

    // no further spawns once idle
    let count = sup.spawn_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sup.spawn_count(), count);
}

#[tokio::test]
async fn nonzero_exit_stops_loop() {
    let sup = ProcessSupervisor::new();
    let mut events = sup.subscribe();
    assert!(sup.start(stub("echo boom; exit 7")));

    let crashed = next_matching(&mut events, Duration::from_secs(10), |e| {
        matches!(e, SupervisorEvent::Crashed { .. })
    })
    .await;
    match crashed {
        SupervisorEvent::Crashed { exit_code, output } => {
            assert_eq!(exit_code, Some(7));
            assert!(output.iter().any(|l| l.content == "boom"));
        }
        _ => unreachable!(),
    }

    let stopped = next_matching(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SupervisorEvent::Stopped { .. })
    })
    .await;
    assert!(matches!(
        stopped,
        SupervisorEvent::Stopped {
            reason: StopReason::Crashed { exit_code: Some(7) }
        }
    ));

    sup.wait_idle(Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sup.spawn_count(), 1);
    assert_eq!(sup.state(), SupervisorState::Idle);
}

#[tokio::test]
async fn request_stop_terminates_sleeping_child() {
    let grace = Duration::from_millis(500);
    let sup = ProcessSupervisor::with_grace_period(grace);
    let mut events = sup.subscribe();
    assert!(sup.start(stub("exec sleep 30")));

    let pid = match next_matching(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SupervisorEvent::Spawned { .. })
    })
    .await
    {
        SupervisorEvent::Spawned { pid, .. } => pid,
        _ => unreachable!(),
    };

    let started = Instant::now();
    assert!(sup.request_stop());
    sup.wait_idle(sup.stop_timeout()).await.unwrap();

    assert!(started.elapsed() < sup.stop_timeout());
    assert_eq!(sup.state(), SupervisorState::Idle);
    assert!(!pid_alive(pid));
    assert_eq!(sup.spawn_count(), 1);
}

#[tokio::test]
async fn child_ignoring_sigterm_is_killed_after_grace() {
    let grace = Duration::from_millis(300);
    let sup = ProcessSupervisor::with_grace_period(grace);
    let mut events = sup.subscribe();
    assert!(sup.start(stub("trap '' TERM; echo ready; exec sleep 30")));

    // wait until the trap is installed; output may race ahead of Spawned
    let mut pid = None;
    let mut ready = false;
    while pid.is_none() || !ready {
        match next_matching(&mut events, Duration::from_secs(5), |e| {
            matches!(e, SupervisorEvent::Spawned { .. } | SupervisorEvent::Output(_))
        })
        .await
        {
            SupervisorEvent::Spawned { pid: p, .. } => pid = Some(p),
            SupervisorEvent::Output(line) if line.content == "ready" => ready = true,
            _ => {}
        }
    }

    let started = Instant::now();
    sup.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= grace, "killed before the grace period: {:?}", elapsed);
    assert!(elapsed < sup.stop_timeout());
    assert_eq!(sup.state(), SupervisorState::Idle);
    assert!(!pid_alive(pid.unwrap()));
}

#[tokio::test]
async fn start_while_running_is_noop() {
    let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(300));
    assert!(sup.start(stub("exec sleep 30")));
    wait_for_spawns(&sup, 1).await;

    assert!(!sup.start(stub("exec sleep 30")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sup.spawn_count(), 1);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn output_is_streamed_before_exit() {
    let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(300));
    let mut events = sup.subscribe();
    assert!(sup.start(stub("echo '[ERROR] audio device lost' >&2; exec sleep 30")));

    let event = next_matching(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SupervisorEvent::Output(_))
    })
    .await;
    // still running when the line arrives
    assert_eq!(sup.state(), SupervisorState::Running);
    match event {
        SupervisorEvent::Output(line) => {
            assert_eq!(line.content, "[ERROR] audio device lost");
            assert_eq!(line.level, LogLevel::Error);
        }
        _ => unreachable!(),
    }

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_supervisor_can_be_restarted() {
    let sup = ProcessSupervisor::with_grace_period(Duration::from_millis(300));
    assert!(sup.start(stub("exec sleep 30")));
    wait_for_spawns(&sup, 1).await;
    sup.stop().await.unwrap();

    assert!(sup.start(stub("exec sleep 30")));
    wait_for_spawns(&sup, 2).await;
    assert_eq!(sup.state(), SupervisorState::Running);
    sup.stop().await.unwrap();
}
