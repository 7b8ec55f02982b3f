//! Managed Process - one run of the workload with live stdio capture
//!
//! Each spawn of the workload is wrapped in a `ManagedProcess`:
//! - stdout/stderr are read line-by-line as they arrive and forwarded to
//!   `tracing` and to supervisor subscribers (never buffered until exit)
//! - a ring buffer keeps recent output for crash reports
//! - termination is graceful first (SIGTERM), then forced after a grace period

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::error::SupervisorError;
use super::process;
use super::SupervisorEvent;

/// Maximum number of output lines kept per process.
const DEFAULT_LOG_BUFFER: usize = 1_000;

/// Matches the bracket tag the workload prefixes its lines with.
const DEFAULT_LOG_PATTERN: &str = r"^\s*\[(?P<level>DEBUG|INFO|WARN|WARNING|ERROR|FATAL)\]";

// ─── Log Types ───────────────────────────────────────────────

/// A single line of console output from the workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    /// Sequential ID within one process run
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Where the line came from
    pub source: LogSource,
    /// Raw text content
    pub content: String,
    /// Parsed severity level
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Messages from the supervisor itself
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

// ─── Log Buffer ──────────────────────────────────────────────

/// Ring buffer that stores recent log lines with sequential IDs.
struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_BUFFER)
    }

    fn with_capacity(max_size: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_size),
            next_id: 0,
            max_size,
        }
    }

    /// Push a new log line and return the created `LogLine`.
    fn push(&mut self, source: LogSource, content: String, level: LogLevel) -> LogLine {
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
            level,
        };
        self.next_id += 1;

        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Get the most recent `count` lines.
    fn get_recent(&self, count: usize) -> Vec<LogLine> {
        self.lines.iter().rev().take(count).rev().cloned().collect()
    }
}

// ─── Workload Command ────────────────────────────────────────

/// How to launch the workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Regex with a named `level` group. `None` uses the bracket-tag pattern.
    pub log_pattern: Option<String>,
}

impl WorkloadCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            log_pattern: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn log_regex(&self) -> Arc<Regex> {
        if let Some(pat) = &self.log_pattern {
            match Regex::new(pat) {
                Ok(re) => return Arc::new(re),
                Err(e) => {
                    tracing::warn!("Invalid log_pattern '{}': {}, falling back to default", pat, e);
                }
            }
        }
        default_log_regex()
    }
}

impl std::fmt::Display for WorkloadCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// ─── Managed Process ─────────────────────────────────────────

/// One running instance of the workload. Owned by the supervisor loop.
pub struct ManagedProcess {
    child: Child,
    /// Process PID
    pub pid: u32,
    log_buffer: Arc<Mutex<LogBuffer>>,
    readers: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawn the workload and start forwarding its output.
    pub fn spawn(
        command: &WorkloadCommand,
        events: broadcast::Sender<SupervisorEvent>,
    ) -> Result<Self, SupervisorError> {
        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        // Windows: hide console window
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            program: command.program.clone(),
            reason: "process exited before its PID could be read".to_string(),
        })?;

        let log_buffer = Arc::new(Mutex::new(LogBuffer::new()));
        let log_regex = command.log_regex();
        let mut readers = Vec::with_capacity(2);

        // ── stdout reader ────────────────────────────────────
        if let Some(stdout) = child.stdout.take() {
            let buf = log_buffer.clone();
            let bc = events.clone();
            let re = log_regex.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let level = parse_log_level(&line, Some(&re));
                    forward(&buf, &bc, LogSource::Stdout, line, level).await;
                }
            }));
        }

        // ── stderr reader ────────────────────────────────────
        if let Some(stderr) = child.stderr.take() {
            let buf = log_buffer.clone();
            let bc = events.clone();
            let re = log_regex;
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let level = parse_log_level(&line, Some(&re));
                    // stderr lines default to at least Warn
                    let effective = if level == LogLevel::Info || level == LogLevel::Debug {
                        LogLevel::Warn
                    } else {
                        level
                    };
                    forward(&buf, &bc, LogSource::Stderr, line, effective).await;
                }
            }));
        }

        tracing::info!("[Supervisor] Workload started with PID {}: {}", pid, command);

        Ok(Self {
            child,
            pid,
            log_buffer,
            readers,
        })
    }

    /// Wait for natural exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, SupervisorError> {
        self.child.wait().await.map_err(|e| SupervisorError::WaitFailed {
            pid: self.pid,
            reason: e.to_string(),
        })
    }

    /// SIGTERM, wait up to `grace`, then force-kill.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, SupervisorError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(status);
        }

        match process::request_terminate(self.pid) {
            Ok(true) => {
                if let Ok(result) = tokio::time::timeout(grace, self.child.wait()).await {
                    let status = result.map_err(|e| SupervisorError::WaitFailed {
                        pid: self.pid,
                        reason: e.to_string(),
                    })?;
                    tracing::info!("[Supervisor] Workload (pid {}) exited after SIGTERM: {}", self.pid, status);
                    return Ok(status);
                }
                tracing::warn!(
                    "[Supervisor] Workload (pid {}) still alive after {:?}, killing",
                    self.pid,
                    grace
                );
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("[Supervisor] SIGTERM failed: {}", e),
        }

        self.child.kill().await.map_err(|e| SupervisorError::TerminateFailed {
            pid: self.pid,
            reason: e.to_string(),
        })?;
        self.wait().await
    }

    /// Give the reader tasks up to `timeout` to flush what the child wrote
    /// before exiting. Readers still blocked after that (e.g. a grandchild
    /// holding the pipe) are aborted.
    pub async fn drain_output(&mut self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in self.readers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    /// Record a supervisor message alongside the process output.
    pub async fn push_system(&self, message: String) -> LogLine {
        self.log_buffer
            .lock()
            .await
            .push(LogSource::System, message, LogLevel::Info)
    }

    /// Get the most recent `count` log lines.
    pub async fn recent_output(&self, count: usize) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_recent(count)
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        for handle in &self.readers {
            handle.abort();
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────

async fn forward(
    buf: &Mutex<LogBuffer>,
    events: &broadcast::Sender<SupervisorEvent>,
    source: LogSource,
    content: String,
    level: LogLevel,
) {
    match level {
        LogLevel::Debug => tracing::debug!("[Workload] {}", content),
        LogLevel::Info => tracing::info!("[Workload] {}", content),
        LogLevel::Warn => tracing::warn!("[Workload] {}", content),
        LogLevel::Error => tracing::error!("[Workload] {}", content),
    }
    let line = buf.lock().await.push(source, content, level);
    let _ = events.send(SupervisorEvent::Output(line));
}

fn default_log_regex() -> Arc<Regex> {
    static RE: OnceLock<Arc<Regex>> = OnceLock::new();
    RE.get_or_init(|| Arc::new(Regex::new(DEFAULT_LOG_PATTERN).expect("static pattern")))
        .clone()
}

/// Parse the log level from a workload line using an optional regex pattern.
///
/// The pattern should contain a named capture group `level`.
/// Lines without a match default to Info.
fn parse_log_level(line: &str, pattern: Option<&Regex>) -> LogLevel {
    if let Some(re) = pattern {
        if let Some(caps) = re.captures(line) {
            if let Some(level_match) = caps.name("level") {
                return match level_match.as_str().to_uppercase().as_str() {
                    "ERROR" | "FATAL" => LogLevel::Error,
                    "WARN" | "WARNING" => LogLevel::Warn,
                    "DEBUG" | "TRACE" => LogLevel::Debug,
                    _ => LogLevel::Info,
                };
            }
        }
    }
    LogLevel::Info
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ─── Tests ───────────────────────────────────────────────────
