//! The agent's command table.
//!
//! [`build_router`] wires every supported command name to a handler over the
//! capability seams. Payload field names follow the server's camelCase
//! convention; malformed payloads surface as per-request errors, never as
//! transport faults.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::capability::{
    KeyInjector, MouseAction, MouseButton, MouseInjector, PowerControl, PowerKind, ProcessRunner,
};
use crate::capture::{BatchQueue, CaptureConfig, CaptureEngine};
use crate::error::ReconError;
use crate::protocol::dispatch::CommandRouter;

/// The OS-level capabilities the command table drives.
#[derive(Clone)]
pub struct Capabilities {
    pub keys: Arc<dyn KeyInjector>,
    pub mouse: Arc<dyn MouseInjector>,
    pub processes: Arc<dyn ProcessRunner>,
    pub power: Arc<dyn PowerControl>,
}

// ── Payloads ─────────────────────────────────────────────────────

const DEFAULT_HOLD_MS: u64 = 30;
const DEFAULT_CLICK_DELAY_MS: u32 = 30;
const DEFAULT_DOUBLE_CLICK_DELAY_MS: u32 = 120;
const DEFAULT_TERMINAL_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct KeyPayload {
    key: u16,
    #[serde(rename = "holdMs", default = "default_hold_ms")]
    hold_ms: u64,
}

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

#[derive(Debug, Deserialize)]
struct MoveMousePayload {
    #[serde(rename = "deltaX", default)]
    delta_x: i32,
    #[serde(rename = "deltaY", default)]
    delta_y: i32,
}

#[derive(Debug, Deserialize)]
struct MouseButtonPayload {
    #[serde(default)]
    button: MouseButton,
    #[serde(rename = "delayMs", default = "default_click_delay_ms")]
    delay_ms: u32,
}

fn default_click_delay_ms() -> u32 {
    DEFAULT_CLICK_DELAY_MS
}

#[derive(Debug, Deserialize)]
struct DoubleClickPayload {
    #[serde(rename = "delayMs", default = "default_double_click_delay_ms")]
    delay_ms: u32,
}

fn default_double_click_delay_ms() -> u32 {
    DEFAULT_DOUBLE_CLICK_DELAY_MS
}

#[derive(Debug, Deserialize)]
struct ScrollPayload {
    clicks: i32,
}

#[derive(Debug, Deserialize)]
struct TerminalPayload {
    command: String,
    #[serde(default = "default_terminal_timeout_ms")]
    timeout: u64,
}

fn default_terminal_timeout_ms() -> u64 {
    DEFAULT_TERMINAL_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
struct KillProcessPayload {
    pid: u32,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct StartProcessPayload {
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(default)]
    arguments: String,
    #[serde(rename = "redirectOutput", default)]
    redirect_output: bool,
}

#[derive(Debug, Deserialize)]
struct SetCwdPayload {
    path: String,
}

/// `screen.start` accepts per-stream overrides of the capture defaults.
#[derive(Debug, Default, Deserialize)]
struct ScreenStartPayload {
    quality: Option<u8>,
    #[serde(rename = "intervalMs")]
    interval_ms: Option<u64>,
    #[serde(rename = "tileSize")]
    tile_size: Option<u32>,
    downscale: Option<f64>,
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, ReconError> {
    serde_json::from_value(payload).map_err(|e| ReconError::InvalidPayload(e.to_string()))
}

// ── Router construction ──────────────────────────────────────────

/// Build the full routing table over the given capabilities, capture engine
/// and outbound batch queue.
pub fn build_router(
    caps: Capabilities,
    engine: Arc<CaptureEngine>,
    queue: Arc<BatchQueue>,
    capture_defaults: CaptureConfig,
) -> CommandRouter {
    let mut router = CommandRouter::new();

    // ── keyboard ─────────────────────────────────────────────────

    let keys = Arc::clone(&caps.keys);
    router.register("keyboard.keyDown", move |payload| {
        let keys = Arc::clone(&keys);
        Box::pin(async move {
            let p: KeyPayload = parse(payload)?;
            keys.inject_key(p.key, true)?;
            Ok(json!("ok"))
        })
    });

    let keys = Arc::clone(&caps.keys);
    router.register("keyboard.keyUp", move |payload| {
        let keys = Arc::clone(&keys);
        Box::pin(async move {
            let p: KeyPayload = parse(payload)?;
            keys.inject_key(p.key, false)?;
            Ok(json!("ok"))
        })
    });

    let keys = Arc::clone(&caps.keys);
    router.register("keyboard.press", move |payload| {
        let keys = Arc::clone(&keys);
        Box::pin(async move {
            let p: KeyPayload = parse(payload)?;
            keys.inject_key(p.key, true)?;
            tokio::time::sleep(Duration::from_millis(p.hold_ms)).await;
            keys.inject_key(p.key, false)?;
            Ok(json!("ok"))
        })
    });

    // ── mouse ────────────────────────────────────────────────────

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.move", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: MoveMousePayload = parse(payload)?;
            mouse.inject(MouseAction::Move {
                dx: p.delta_x,
                dy: p.delta_y,
            })?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.down", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: MouseButtonPayload = parse(payload)?;
            mouse.inject(MouseAction::Down(p.button))?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.up", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: MouseButtonPayload = parse(payload)?;
            mouse.inject(MouseAction::Up(p.button))?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.click", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: MouseButtonPayload = parse(payload)?;
            mouse.inject(MouseAction::Click {
                button: p.button,
                delay_ms: p.delay_ms,
            })?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.rightClick", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: MouseButtonPayload = parse(payload).unwrap_or(MouseButtonPayload {
                button: MouseButton::Right,
                delay_ms: DEFAULT_CLICK_DELAY_MS,
            });
            mouse.inject(MouseAction::Click {
                button: MouseButton::Right,
                delay_ms: p.delay_ms,
            })?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.doubleClick", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: DoubleClickPayload = parse(payload)?;
            mouse.inject(MouseAction::DoubleClick {
                delay_ms: p.delay_ms,
            })?;
            Ok(json!("ok"))
        })
    });

    let mouse = Arc::clone(&caps.mouse);
    router.register("mouse.scroll", move |payload| {
        let mouse = Arc::clone(&mouse);
        Box::pin(async move {
            let p: ScrollPayload = parse(payload)?;
            mouse.inject(MouseAction::Scroll { clicks: p.clicks })?;
            Ok(json!("ok"))
        })
    });

    // ── terminal ─────────────────────────────────────────────────

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.execute", move |payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let p: TerminalPayload = parse(payload)?;
            let output = processes
                .run(&p.command, Duration::from_millis(p.timeout))
                .await?;
            Ok(serde_json::to_value(output)?)
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.powershell", move |payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let p: TerminalPayload = parse(payload)?;
            let output = processes
                .run_script(&p.command, Duration::from_millis(p.timeout))
                .await?;
            Ok(serde_json::to_value(output)?)
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.listProcesses", move |_payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let list = processes.list().await?;
            Ok(serde_json::to_value(list)?)
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.killProcess", move |payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let p: KillProcessPayload = parse(payload)?;
            let killed = processes.kill(p.pid, p.force).await?;
            Ok(json!(killed))
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.startProcess", move |payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let p: StartProcessPayload = parse(payload)?;
            let pid = processes
                .start_detached(&p.file_name, &p.arguments, p.redirect_output)
                .await?;
            Ok(json!(pid))
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.getCwd", move |_payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move { Ok(json!(processes.cwd())) })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.setCwd", move |payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            let p: SetCwdPayload = parse(payload)?;
            processes.set_cwd(&p.path)?;
            Ok(json!("ok"))
        })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.whoAmI", move |_payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move { Ok(json!(processes.who_am_i())) })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.getUptime", move |_payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move { Ok(json!(processes.uptime().as_secs())) })
    });

    let processes = Arc::clone(&caps.processes);
    router.register("terminal.abort", move |_payload| {
        let processes = Arc::clone(&processes);
        Box::pin(async move {
            processes.abort();
            Ok(json!("ok"))
        })
    });

    // ── power ────────────────────────────────────────────────────

    for (name, kind) in [
        ("power.shutdown", PowerKind::Shutdown),
        ("power.restart", PowerKind::Restart),
        ("power.sleep", PowerKind::Sleep),
        ("power.lock", PowerKind::Lock),
    ] {
        let power = Arc::clone(&caps.power);
        router.register(name, move |_payload| {
            let power = Arc::clone(&power);
            Box::pin(async move {
                let status = power.power_action(kind).await?;
                Ok(json!(status))
            })
        });
    }

    // ── screen ───────────────────────────────────────────────────

    let start_engine = Arc::clone(&engine);
    let start_queue = Arc::clone(&queue);
    let defaults = capture_defaults.clone();
    router.register("screen.start", move |payload| {
        let engine = Arc::clone(&start_engine);
        let queue = Arc::clone(&start_queue);
        let defaults = defaults.clone();
        Box::pin(async move {
            if engine.is_running() {
                return Ok(json!("already_running"));
            }
            let p: ScreenStartPayload = if payload.is_null() {
                ScreenStartPayload::default()
            } else {
                parse(payload)?
            };
            let config = CaptureConfig {
                quality: p.quality.unwrap_or(defaults.quality),
                interval: p
                    .interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.interval),
                tile_size: p.tile_size.unwrap_or(defaults.tile_size),
                downscale: p.downscale.unwrap_or(defaults.downscale),
            };
            if config.tile_size == 0 {
                return Err(ReconError::InvalidPayload("tileSize must be > 0".into()));
            }
            if config.interval.is_zero() {
                return Err(ReconError::InvalidPayload("intervalMs must be > 0".into()));
            }
            if !(config.downscale > 0.0 && config.downscale <= 1.0) {
                return Err(ReconError::InvalidPayload(
                    "downscale must be in (0, 1]".into(),
                ));
            }
            engine.start(config, move |batch| queue.push(batch));
            Ok(json!("started"))
        })
    });

    let stop_engine = Arc::clone(&engine);
    router.register("screen.stop", move |_payload| {
        let engine = Arc::clone(&stop_engine);
        Box::pin(async move {
            engine.stop().await;
            Ok(json!("stopped"))
        })
    });

    router
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CaptureSource, ProcessInfo, ProcessOutput};
    use crate::capture::{PixelBuffer, ZstdRegionEncoder};
    use crate::protocol::envelope::{CommandRequest, CommandResponse};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingInput {
        keys: Mutex<Vec<(u16, bool)>>,
        actions: Mutex<Vec<MouseAction>>,
    }

    impl KeyInjector for RecordingInput {
        fn inject_key(&self, code: u16, down: bool) -> Result<(), ReconError> {
            self.keys.lock().unwrap().push((code, down));
            Ok(())
        }
    }

    impl MouseInjector for RecordingInput {
        fn inject(&self, action: MouseAction) -> Result<(), ReconError> {
            self.actions.lock().unwrap().push(action);
            Ok(())
        }
    }

    /// Runner that echoes inputs back through its outputs so every routing
    /// path is observable without spawning processes.
    #[derive(Default)]
    struct EchoRunner {
        cwd: Mutex<String>,
        aborted: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl ProcessRunner for EchoRunner {
        async fn run(&self, command: &str, _timeout: Duration) -> Result<ProcessOutput, ReconError> {
            Ok(ProcessOutput {
                stdout: command.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn run_script(
            &self,
            script: &str,
            _timeout: Duration,
        ) -> Result<ProcessOutput, ReconError> {
            Ok(ProcessOutput {
                stdout: format!("ps> {script}"),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn list(&self) -> Result<Vec<ProcessInfo>, ReconError> {
            Ok(vec![ProcessInfo {
                pid: 42,
                name: "init".into(),
                memory_mb: 7,
            }])
        }

        async fn kill(&self, pid: u32, _force: bool) -> Result<bool, ReconError> {
            Ok(pid == 42)
        }

        async fn start_detached(
            &self,
            file_name: &str,
            _arguments: &str,
            _redirect_output: bool,
        ) -> Result<i64, ReconError> {
            Ok(file_name.len() as i64)
        }

        fn cwd(&self) -> String {
            self.cwd.lock().unwrap().clone()
        }

        fn set_cwd(&self, path: &str) -> Result<(), ReconError> {
            *self.cwd.lock().unwrap() = path.to_string();
            Ok(())
        }

        fn who_am_i(&self) -> String {
            "tester".into()
        }

        fn uptime(&self) -> Duration {
            Duration::from_secs(90)
        }

        fn abort(&self) {
            *self.aborted.lock().unwrap() = true;
        }
    }

    struct NoopPower;

    #[async_trait::async_trait]
    impl PowerControl for NoopPower {
        async fn power_action(&self, kind: PowerKind) -> Result<String, ReconError> {
            Ok(format!("{kind:?}"))
        }
    }

    struct BlankSource;

    impl CaptureSource for BlankSource {
        fn capture(&mut self, _downscale: f64) -> Result<PixelBuffer, ReconError> {
            Ok(PixelBuffer::new(8, 8, 3, vec![0; 8 * 8 * 3]))
        }
    }

    fn harness() -> (
        CommandRouter,
        Arc<RecordingInput>,
        Arc<EchoRunner>,
        Arc<CaptureEngine>,
    ) {
        let input = Arc::new(RecordingInput::default());
        let runner = Arc::new(EchoRunner::default());
        let caps = Capabilities {
            keys: input.clone(),
            mouse: input.clone(),
            processes: runner.clone(),
            power: Arc::new(NoopPower),
        };
        let engine = Arc::new(CaptureEngine::new(
            Box::new(BlankSource),
            Arc::new(ZstdRegionEncoder),
        ));
        let queue = Arc::new(BatchQueue::default());
        let router = build_router(caps, Arc::clone(&engine), queue, CaptureConfig::default());
        (router, input, runner, engine)
    }

    fn request(command: &str, payload: Value) -> CommandRequest {
        CommandRequest::new(Some("1"), command, payload)
    }

    fn expect_success(response: Option<CommandResponse>) -> Value {
        match response {
            Some(CommandResponse::Success { result, .. }) => result,
            other => panic!("expected a success response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn key_press_injects_down_then_up() {
        let (router, input, _, _) = harness();
        let result = expect_success(
            router
                .dispatch(request("keyboard.press", json!({"key": 65, "holdMs": 0})))
                .await,
        );
        assert_eq!(result, json!("ok"));
        assert_eq!(*input.keys.lock().unwrap(), vec![(65, true), (65, false)]);
    }

    #[tokio::test]
    async fn mouse_move_maps_deltas() {
        let (router, input, _, _) = harness();
        expect_success(
            router
                .dispatch(request("mouse.move", json!({"deltaX": 10, "deltaY": -4})))
                .await,
        );
        assert_eq!(
            *input.actions.lock().unwrap(),
            vec![MouseAction::Move { dx: 10, dy: -4 }]
        );
    }

    #[tokio::test]
    async fn right_click_forces_right_button() {
        let (router, input, _, _) = harness();
        expect_success(router.dispatch(request("mouse.rightClick", json!({}))).await);
        assert_eq!(
            *input.actions.lock().unwrap(),
            vec![MouseAction::Click {
                button: MouseButton::Right,
                delay_ms: DEFAULT_CLICK_DELAY_MS,
            }]
        );
    }

    #[tokio::test]
    async fn terminal_execute_returns_process_output() {
        let (router, _, _, _) = harness();
        let result = expect_success(
            router
                .dispatch(request("terminal.execute", json!({"command": "whoami"})))
                .await,
        );
        assert_eq!(result["stdout"], "whoami");
        assert_eq!(result["exitCode"], 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_per_request_error() {
        let (router, _, _, _) = harness();
        let response = router
            .dispatch(request("terminal.execute", json!({"no_command": true})))
            .await
            .unwrap();
        assert!(matches!(response, CommandResponse::Error { .. }));
    }

    #[tokio::test]
    async fn double_click_uses_the_longer_default_delay() {
        let (router, input, _, _) = harness();
        expect_success(
            router
                .dispatch(request("mouse.doubleClick", json!({})))
                .await,
        );
        assert_eq!(
            *input.actions.lock().unwrap(),
            vec![MouseAction::DoubleClick {
                delay_ms: DEFAULT_DOUBLE_CLICK_DELAY_MS,
            }]
        );
    }

    #[test]
    fn omitted_timing_fields_use_documented_defaults() {
        let key: KeyPayload = parse(json!({"key": 1})).unwrap();
        assert_eq!(key.hold_ms, 30);

        let click: MouseButtonPayload = parse(json!({})).unwrap();
        assert_eq!(click.delay_ms, 30);

        let double: DoubleClickPayload = parse(json!({})).unwrap();
        assert_eq!(double.delay_ms, 120);

        let term: TerminalPayload = parse(json!({"command": "dir"})).unwrap();
        assert_eq!(term.timeout, 30_000);
    }

    #[tokio::test]
    async fn powershell_routes_to_the_script_runner() {
        let (router, _, _, _) = harness();
        let result = expect_success(
            router
                .dispatch(request("terminal.powershell", json!({"command": "Get-Date"})))
                .await,
        );
        assert_eq!(result["stdout"], "ps> Get-Date");
    }

    #[tokio::test]
    async fn list_processes_serializes_camel_case_entries() {
        let (router, _, _, _) = harness();
        let result = expect_success(
            router
                .dispatch(request("terminal.listProcesses", json!({})))
                .await,
        );
        assert_eq!(result[0]["pid"], 42);
        assert_eq!(result[0]["name"], "init");
        assert_eq!(result[0]["memoryMb"], 7);
    }

    #[tokio::test]
    async fn kill_process_reports_the_outcome() {
        let (router, _, _, _) = harness();
        let killed = expect_success(
            router
                .dispatch(request("terminal.killProcess", json!({"pid": 42})))
                .await,
        );
        assert_eq!(killed, json!(true));

        let missed = expect_success(
            router
                .dispatch(request("terminal.killProcess", json!({"pid": 7, "force": true})))
                .await,
        );
        assert_eq!(missed, json!(false));
    }

    #[tokio::test]
    async fn start_process_returns_the_pid() {
        let (router, _, _, _) = harness();
        let pid = expect_success(
            router
                .dispatch(request("terminal.startProcess", json!({"fileName": "notepad"})))
                .await,
        );
        assert_eq!(pid, json!(7));
    }

    #[tokio::test]
    async fn cwd_roundtrips_through_set_and_get() {
        let (router, _, _, _) = harness();
        expect_success(
            router
                .dispatch(request("terminal.setCwd", json!({"path": "/srv/work"})))
                .await,
        );
        let cwd = expect_success(router.dispatch(request("terminal.getCwd", json!({}))).await);
        assert_eq!(cwd, json!("/srv/work"));
    }

    #[tokio::test]
    async fn who_am_i_and_uptime_report_runner_state() {
        let (router, _, _, _) = harness();
        let who = expect_success(router.dispatch(request("terminal.whoAmI", json!({}))).await);
        assert_eq!(who, json!("tester"));

        let uptime = expect_success(
            router
                .dispatch(request("terminal.getUptime", json!({})))
                .await,
        );
        assert_eq!(uptime, json!(90));
    }

    #[tokio::test]
    async fn abort_reaches_the_runner() {
        let (router, _, runner, _) = harness();
        expect_success(router.dispatch(request("terminal.abort", json!({}))).await);
        assert!(*runner.aborted.lock().unwrap());
    }

    #[tokio::test]
    async fn screen_start_reports_already_running() {
        let (router, _, _, engine) = harness();
        let first = expect_success(router.dispatch(request("screen.start", json!({}))).await);
        assert_eq!(first, json!("started"));

        let second = expect_success(router.dispatch(request("screen.start", json!({}))).await);
        assert_eq!(second, json!("already_running"));

        let stopped = expect_success(router.dispatch(request("screen.stop", json!({}))).await);
        assert_eq!(stopped, json!("stopped"));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn screen_start_rejects_bad_settings_without_wedging() {
        let (router, _, _, engine) = harness();

        for bad in [
            json!({"tileSize": 0}),
            json!({"intervalMs": 0}),
            json!({"downscale": 0.0}),
        ] {
            let response = router.dispatch(request("screen.start", bad)).await.unwrap();
            assert!(matches!(response, CommandResponse::Error { .. }));
            assert!(!engine.is_running());
        }

        // A rejected start must not poison later valid ones.
        let started = expect_success(router.dispatch(request("screen.start", json!({}))).await);
        assert_eq!(started, json!("started"));
        expect_success(router.dispatch(request("screen.stop", json!({}))).await);
        assert!(!engine.is_running());
    }
}
