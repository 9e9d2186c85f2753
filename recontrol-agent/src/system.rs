//! OS-facing capability implementations.
//!
//! The shell runner and power control drive the real platform; input
//! injection and screen capture are tracing-only stand-ins here, since the
//! Win32 injection and capture layers ship separately.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use recontrol_core::capability::{
    CaptureSource, KeyInjector, MouseAction, MouseInjector, PowerControl, PowerKind, ProcessInfo,
    ProcessOutput, ProcessRunner,
};
use recontrol_core::capture::PixelBuffer;
use recontrol_core::error::ReconError;

// ── Shell ────────────────────────────────────────────────────────

/// Shell execution and process management over the platform's own tools.
///
/// Keeps the working directory that runs and spawns inherit, and an abort
/// token covering the current shell run.
pub struct ShellRunner {
    cwd: Mutex<PathBuf>,
    abort: Mutex<CancellationToken>,
    started: Instant,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            cwd: Mutex::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
            abort: Mutex::new(CancellationToken::new()),
            started: Instant::now(),
        }
    }

    /// Run a prepared command in the current working directory, bounded by
    /// `timeout` and the abort token. The child is killed when either fires.
    async fn execute(&self, mut cmd: Command, timeout: Duration) -> Result<ProcessOutput, ReconError> {
        let abort = {
            let mut guard = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = CancellationToken::new();
            guard.clone()
        };
        cmd.current_dir(self.cwd());
        cmd.kill_on_drop(true);

        let output = tokio::select! {
            _ = abort.cancelled() => return Err(ReconError::Other("command aborted".into())),
            out = tokio::time::timeout(timeout, cmd.output()) => out
                .map_err(|_| ReconError::Timeout(timeout))?
                .map_err(|e| ReconError::Other(format!("shell spawn failed: {e}")))?,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn powershell_command(script: &str) -> Command {
    let mut cmd = if cfg!(target_os = "windows") {
        Command::new("powershell.exe")
    } else {
        Command::new("pwsh")
    };
    cmd.args(["-NoProfile", "-Command", script]);
    cmd
}

/// Parse `ps -eo pid=,rss=,comm=` output.
fn parse_ps(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let rss_kb: u64 = parts.next()?.parse().ok()?;
            let name = parts.collect::<Vec<_>>().join(" ");
            (!name.is_empty()).then(|| ProcessInfo {
                pid,
                name,
                memory_mb: rss_kb / 1024,
            })
        })
        .collect()
}

/// Parse `tasklist /FO CSV /NH` output ("name","pid","session","1","12,345 K").
fn parse_tasklist(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().trim_matches('"').split("\",\"").collect();
            if fields.len() < 5 {
                return None;
            }
            let pid = fields[1].parse().ok()?;
            let mem_kb: u64 = fields[4]
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            Some(ProcessInfo {
                pid,
                name: fields[0].to_string(),
                memory_mb: mem_kb / 1024,
            })
        })
        .collect()
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, ReconError> {
        tracing::info!(%command, timeout_ms = timeout.as_millis() as u64, "running shell command");
        self.execute(shell_command(command), timeout).await
    }

    async fn run_script(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, ReconError> {
        tracing::info!(%script, timeout_ms = timeout.as_millis() as u64, "running powershell");
        self.execute(powershell_command(script), timeout).await
    }

    async fn list(&self) -> Result<Vec<ProcessInfo>, ReconError> {
        let command = if cfg!(target_os = "windows") {
            "tasklist /FO CSV /NH"
        } else {
            "ps -eo pid=,rss=,comm="
        };
        let output = self.execute(shell_command(command), Duration::from_secs(10)).await?;
        Ok(if cfg!(target_os = "windows") {
            parse_tasklist(&output.stdout)
        } else {
            parse_ps(&output.stdout)
        })
    }

    async fn kill(&self, pid: u32, force: bool) -> Result<bool, ReconError> {
        tracing::warn!(pid, force, "killing process");
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("taskkill");
            c.args(["/PID", &pid.to_string()]);
            if force {
                c.arg("/F");
            }
            c
        } else {
            let mut c = Command::new("kill");
            c.arg(if force { "-KILL" } else { "-TERM" });
            c.arg(pid.to_string());
            c
        };
        let status = cmd
            .status()
            .await
            .map_err(|e| ReconError::Other(format!("kill failed: {e}")))?;
        Ok(status.success())
    }

    async fn start_detached(
        &self,
        file_name: &str,
        arguments: &str,
        redirect_output: bool,
    ) -> Result<i64, ReconError> {
        tracing::info!(%file_name, %arguments, "starting detached process");
        let mut cmd = Command::new(file_name);
        // Arguments are whitespace-split, not shell-parsed.
        if !arguments.is_empty() {
            cmd.args(arguments.split_whitespace());
        }
        cmd.current_dir(self.cwd());
        if redirect_output {
            cmd.stdout(std::process::Stdio::null());
            cmd.stderr(std::process::Stdio::null());
        }
        let child = cmd
            .spawn()
            .map_err(|e| ReconError::Other(format!("spawn failed: {e}")))?;
        Ok(child.id().map(i64::from).unwrap_or(-1))
    }

    fn cwd(&self) -> String {
        self.cwd
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_string_lossy()
            .into_owned()
    }

    fn set_cwd(&self, path: &str) -> Result<(), ReconError> {
        let canonical = std::fs::canonicalize(path)
            .map_err(|e| ReconError::Other(format!("directory not found: {path} ({e})")))?;
        if !canonical.is_dir() {
            return Err(ReconError::Other(format!("not a directory: {path}")));
        }
        *self.cwd.lock().unwrap_or_else(PoisonError::into_inner) = canonical;
        Ok(())
    }

    fn who_am_i(&self) -> String {
        std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".into())
    }

    fn uptime(&self) -> Duration {
        // /proc reports host uptime; elsewhere fall back to agent uptime.
        if let Ok(text) = std::fs::read_to_string("/proc/uptime") {
            if let Some(secs) = text
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
            {
                return Duration::from_secs_f64(secs);
            }
        }
        self.started.elapsed()
    }

    fn abort(&self) {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

// ── Power ────────────────────────────────────────────────────────

/// Power actions via the platform's own commands.
pub struct SystemPower;

fn power_command(kind: PowerKind) -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        match kind {
            PowerKind::Shutdown => ("shutdown /s /t 0", "shutting down"),
            PowerKind::Restart => ("shutdown /r /t 0", "restarting"),
            PowerKind::Sleep => (
                "rundll32.exe powrprof.dll,SetSuspendState 0,1,0",
                "sleeping",
            ),
            PowerKind::Lock => ("rundll32.exe user32.dll,LockWorkStation", "locked"),
        }
    } else {
        match kind {
            PowerKind::Shutdown => ("systemctl poweroff", "shutting down"),
            PowerKind::Restart => ("systemctl reboot", "restarting"),
            PowerKind::Sleep => ("systemctl suspend", "sleeping"),
            PowerKind::Lock => ("loginctl lock-session", "locked"),
        }
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn power_action(&self, kind: PowerKind) -> Result<String, ReconError> {
        let (command, status) = power_command(kind);
        tracing::warn!(?kind, %command, "power action requested");
        shell_command(command)
            .spawn()
            .map_err(|e| ReconError::Other(format!("power command failed: {e}")))?;
        Ok(status.to_string())
    }
}

// ── Input stand-ins ──────────────────────────────────────────────

/// Logs key events instead of injecting them.
pub struct LogKeyInjector;

impl KeyInjector for LogKeyInjector {
    fn inject_key(&self, code: u16, down: bool) -> Result<(), ReconError> {
        tracing::info!(code, down, "key event");
        Ok(())
    }
}

/// Logs mouse actions instead of injecting them.
pub struct LogMouseInjector;

impl MouseInjector for LogMouseInjector {
    fn inject(&self, action: MouseAction) -> Result<(), ReconError> {
        tracing::info!(?action, "mouse event");
        Ok(())
    }
}

// ── Capture stand-in ─────────────────────────────────────────────

/// Produces a slowly shifting RGB gradient so the full pipeline (diff,
/// encode, dedup, transport) can run without a real display.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl CaptureSource for SyntheticCapture {
    fn capture(&mut self, downscale: f64) -> Result<PixelBuffer, ReconError> {
        let scale = downscale.clamp(0.1, 1.0);
        let width = ((self.width as f64 * scale) as u32).max(1);
        let height = ((self.height as f64 * scale) as u32).max(1);

        let phase = (self.tick / 8) as u8;
        self.tick += 1;

        let mut data = Vec::with_capacity((width * height) as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.push((x as u8).wrapping_add(phase));
                data.push(y as u8);
                data.push(phase);
            }
        }
        Ok(PixelBuffer::new(width, height, 3, data))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runner_captures_output() {
        if cfg!(target_os = "windows") {
            return;
        }
        let output = ShellRunner::new()
            .run("echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn shell_runner_times_out() {
        if cfg!(target_os = "windows") {
            return;
        }
        let err = ShellRunner::new()
            .run("sleep 5", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Timeout(_)));
    }

    #[tokio::test]
    async fn runs_inherit_the_working_directory() {
        if cfg!(target_os = "windows") {
            return;
        }
        let runner = ShellRunner::new();
        runner.set_cwd("/tmp").unwrap();
        let output = runner.run("pwd", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout.trim(), runner.cwd());
    }

    #[test]
    fn set_cwd_rejects_missing_directories() {
        assert!(ShellRunner::new().set_cwd("/definitely/not/here").is_err());
    }

    #[tokio::test]
    async fn process_listing_includes_this_process() {
        if cfg!(target_os = "windows") {
            return;
        }
        let me = std::process::id();
        let list = ShellRunner::new().list().await.unwrap();
        assert!(list.iter().any(|p| p.pid == me));
    }

    #[tokio::test]
    async fn abort_cancels_a_running_command() {
        if cfg!(target_os = "windows") {
            return;
        }
        let runner = std::sync::Arc::new(ShellRunner::new());
        let task = {
            let runner = std::sync::Arc::clone(&runner);
            tokio::spawn(async move { runner.run("sleep 5", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.abort();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("abort did not cut the run short")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn kill_terminates_a_started_process() {
        if cfg!(target_os = "windows") {
            return;
        }
        let runner = ShellRunner::new();
        let pid = runner.start_detached("sleep", "30", true).await.unwrap();
        assert!(pid > 0);
        assert!(runner.kill(pid as u32, true).await.unwrap());
    }

    #[test]
    fn ps_listing_parses_pid_memory_and_name() {
        let parsed = parse_ps("  17 2048 tmux: server\n  bad line\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].pid, 17);
        assert_eq!(parsed[0].memory_mb, 2);
        assert_eq!(parsed[0].name, "tmux: server");
    }

    #[test]
    fn tasklist_listing_parses_quoted_csv() {
        let parsed = parse_tasklist("\"notepad.exe\",\"512\",\"Console\",\"1\",\"12,345 K\"\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].pid, 512);
        assert_eq!(parsed[0].name, "notepad.exe");
        assert_eq!(parsed[0].memory_mb, 12);
    }

    #[test]
    fn synthetic_capture_changes_over_ticks() {
        let mut source = SyntheticCapture::new(64, 64);
        let first = source.capture(1.0).unwrap();
        let mut later = first.clone();
        for _ in 0..16 {
            later = source.capture(1.0).unwrap();
        }
        assert_ne!(first.data, later.data);
    }

    #[test]
    fn synthetic_capture_honors_downscale() {
        let mut source = SyntheticCapture::new(100, 80);
        let frame = source.capture(0.5).unwrap();
        assert_eq!((frame.width, frame.height), (50, 40));
    }
}
