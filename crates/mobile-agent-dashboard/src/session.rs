//! Dashboard state and the handlers that mutate it.
//!
//! `DashboardSession` is plain data plus synchronous transitions. The async
//! controller owns exactly one session and feeds it commands, stream lines and
//! background results; views only ever read it.

use std::fmt;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::{DateTime, Local, NaiveDateTime};
use mobile_agent_client::{ClientError, StopTaskResponse, named_screenshot_url};
use thiserror::Error;

use crate::config::DashboardConfig;
use crate::events::{DecodedLine, Progress, UpdateEvent};
use crate::log::{LogBuffer, LogLevel};
use crate::stats::StatsSnapshot;
use crate::stream::{RunUpdate, StreamUpdate};

pub const STATUS_IDLE: &str = "等待任务";
pub const STATUS_RUNNING: &str = "执行中";
pub const STATUS_COMPLETED: &str = "已完成";
pub const STATUS_STOPPED: &str = "已停止";
pub const STATUS_FAILED: &str = "执行失败";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionState {
    is_executing: bool,
    started_at: Option<Instant>,
    run_id: u64,
}

impl ExecutionState {
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.is_executing
    }

    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Id of the most recently accepted submission; zero before the first one.
    #[must_use]
    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlsState {
    pub input_enabled: bool,
    pub submit_visible: bool,
    pub stop_visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub label: String,
}

impl ConnectionStatus {
    #[must_use]
    pub fn connected() -> Self {
        Self {
            state: ConnectionState::Connected,
            label: "已连接".to_string(),
        }
    }

    #[must_use]
    pub fn failed() -> Self {
        Self {
            state: ConnectionState::Error,
            label: "连接失败".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ScreenshotFrame {
    bytes: Vec<u8>,
}

impl ScreenshotFrame {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn data_url(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for ScreenshotFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenshotFrame")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenshotSource {
    Remote { url: String },
    Frame(ScreenshotFrame),
}

/// What the screenshot panel shows. Holds at most one frame; a new source
/// drops the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenshotSurface {
    source: Option<ScreenshotSource>,
    updated_at: Option<String>,
}

impl ScreenshotSurface {
    #[must_use]
    pub fn source(&self) -> Option<&ScreenshotSource> {
        self.source.as_ref()
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.source.is_none()
    }

    fn replace(&mut self, source: ScreenshotSource) {
        self.source = Some(source);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("instruction is empty")]
    EmptyInstruction,
    #[error("a task is already executing")]
    AlreadyExecuting,
}

/// Returned for an accepted submission; identifies the stream to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTicket {
    pub run_id: u64,
    pub instruction: String,
}

#[derive(Debug, Clone)]
pub struct DashboardSession {
    backend_base_url: String,
    execution: ExecutionState,
    stats: StatsSnapshot,
    logs: LogBuffer,
    connection: Option<ConnectionStatus>,
    screenshot: ScreenshotSurface,
    status_text: String,
    progress_text: String,
    elapsed_text: String,
    auto_scroll: bool,
}

impl DashboardSession {
    #[must_use]
    pub fn new(backend_base_url: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            backend_base_url: backend_base_url.into().trim_end_matches('/').to_string(),
            execution: ExecutionState::default(),
            stats: StatsSnapshot::default(),
            logs: LogBuffer::with_capacity(log_capacity),
            connection: None,
            screenshot: ScreenshotSurface::default(),
            status_text: STATUS_IDLE.to_string(),
            progress_text: Progress::default().label(),
            elapsed_text: format_elapsed(Duration::ZERO),
            auto_scroll: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(config.backend_base_url.clone(), config.log_capacity)
    }

    #[must_use]
    pub fn execution(&self) -> &ExecutionState {
        &self.execution
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.execution.is_executing
    }

    #[must_use]
    pub fn is_current_run(&self, run_id: u64) -> bool {
        run_id != 0 && run_id == self.execution.run_id
    }

    #[must_use]
    pub fn stats(&self) -> &StatsSnapshot {
        &self.stats
    }

    #[must_use]
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionStatus> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn screenshot(&self) -> &ScreenshotSurface {
        &self.screenshot
    }

    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    #[must_use]
    pub fn progress_text(&self) -> &str {
        &self.progress_text
    }

    #[must_use]
    pub fn elapsed_text(&self) -> &str {
        &self.elapsed_text
    }

    #[must_use]
    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    #[must_use]
    pub fn controls(&self) -> ControlsState {
        let executing = self.execution.is_executing;
        ControlsState {
            input_enabled: !executing,
            submit_visible: !executing,
            stop_visible: executing,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(level, message);
    }

    /// Validates an instruction and, if accepted, resets the panel for a new run.
    pub fn begin_task(&mut self, instruction: &str, now: Instant) -> Result<TaskTicket, SubmitError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            self.log(LogLevel::Error, "请输入任务指令");
            return Err(SubmitError::EmptyInstruction);
        }
        if self.execution.is_executing {
            self.log(LogLevel::Warning, "任务正在执行中，请等待完成");
            return Err(SubmitError::AlreadyExecuting);
        }

        self.execution.run_id += 1;
        self.execution.is_executing = true;
        self.execution.started_at = Some(now);
        self.elapsed_text = format_elapsed(Duration::ZERO);
        self.logs.clear();
        self.stats = StatsSnapshot::default();
        self.status_text = STATUS_RUNNING.to_string();
        self.progress_text = Progress::default().label();
        self.log(LogLevel::Info, format!("开始执行任务: {instruction}"));

        Ok(TaskTicket {
            run_id: self.execution.run_id,
            instruction: instruction.to_string(),
        })
    }

    pub fn apply_line(&mut self, line: DecodedLine) {
        match line {
            DecodedLine::Event(event) => self.apply_event(event),
            DecodedLine::Text(text) => self.log(LogLevel::Info, text),
        }
    }

    pub fn apply_event(&mut self, event: UpdateEvent) {
        tracing::trace!(kind = event.kind(), run_id = self.execution.run_id, "applying stream event");
        match event {
            UpdateEvent::Log { message, level } => {
                self.log(level.unwrap_or_default(), message);
            }
            UpdateEvent::Screenshot { path, timestamp } => {
                self.show_named_screenshot(path.as_deref(), timestamp.as_deref());
            }
            UpdateEvent::Status { status, progress } => {
                self.status_text = status;
                if let Some(progress) = progress {
                    self.progress_text = progress.label();
                }
            }
            UpdateEvent::Progress { current, total } | UpdateEvent::Subtask { current, total } => {
                self.progress_text = Progress { current, total }.label();
            }
            UpdateEvent::Stats { stats } => self.stats.merge(stats),
            UpdateEvent::Action {
                action_type,
                action_inputs,
                success,
            } => {
                self.stats.record_action(success);
                let level = if success {
                    LogLevel::Success
                } else {
                    LogLevel::Error
                };
                self.log(level, format!("{action_type}: {action_inputs}"));
            }
            UpdateEvent::ModelCall {
                model_name,
                call_type,
            } => {
                self.stats.record_model_call();
                self.log(LogLevel::Info, format!("模型调用: {model_name} ({call_type})"));
            }
            UpdateEvent::Completion {
                completed,
                failed,
                total,
            } => {
                self.log(
                    LogLevel::Success,
                    format!("任务完成！成功: {completed}, 失败: {failed}, 总计: {total}"),
                );
                self.status_text = STATUS_COMPLETED.to_string();
                self.finish_execution();
            }
            UpdateEvent::Unrecognized { kind } => {
                let kind = kind.as_deref().unwrap_or("(缺失)");
                self.log(LogLevel::Warning, format!("未知更新类型: {kind}"));
            }
        }
    }

    /// Applies one message from a stream consumer. Messages from any run other
    /// than the current one are dropped.
    pub fn apply_run_update(&mut self, message: RunUpdate) {
        let RunUpdate { run_id, update } = message;
        match update {
            StreamUpdate::Line(line) if self.is_current_run(run_id) => self.apply_line(line),
            StreamUpdate::Line(_) => {
                tracing::debug!(run_id, current = self.execution.run_id, "dropping stale stream line");
            }
            StreamUpdate::Failed(error) => self.fail_task(run_id, &error),
            StreamUpdate::Ended => self.end_of_stream(run_id),
        }
    }

    /// The task request or its body failed. Ignored for superseded runs.
    pub fn fail_task(&mut self, run_id: u64, error: &str) {
        if !self.is_current_run(run_id) {
            return;
        }
        self.log(LogLevel::Error, format!("任务执行失败: {error}"));
        self.status_text = STATUS_FAILED.to_string();
        self.finish_execution();
    }

    /// The server closed the stream. A run that never reported completion is
    /// returned to idle so the controls come back.
    pub fn end_of_stream(&mut self, run_id: u64) {
        if !self.is_current_run(run_id) || !self.execution.is_executing {
            return;
        }
        self.log(LogLevel::Warning, "任务流已结束，未收到完成事件");
        self.finish_execution();
    }

    /// Whether a stop request should be sent.
    #[must_use]
    pub fn can_stop(&self) -> bool {
        self.execution.is_executing
    }

    /// Best-effort stop of run `run_id`. The outcome is always logged; the run
    /// returns to idle regardless of the outcome, unless a later run has
    /// started since the stop was requested.
    pub fn stop_settled(&mut self, run_id: u64, outcome: Result<StopTaskResponse, ClientError>) {
        match outcome {
            Ok(_) => self.log(LogLevel::Warning, "任务已停止"),
            Err(error) => self.log(LogLevel::Error, format!("停止任务失败: {error}")),
        }
        if !self.is_current_run(run_id) || !self.execution.is_executing {
            tracing::debug!(run_id, current = self.execution.run_id, "stop settled after run ended");
            return;
        }
        self.status_text = STATUS_STOPPED.to_string();
        self.finish_execution();
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn toggle_auto_scroll(&mut self) -> bool {
        self.auto_scroll = !self.auto_scroll;
        let state = if self.auto_scroll { "开启" } else { "关闭" };
        self.log(LogLevel::Info, format!("自动滚动已{state}"));
        self.auto_scroll
    }

    pub fn begin_connection_refresh(&mut self) {
        self.log(LogLevel::Info, "正在检查连接状态...");
    }

    pub fn connection_checked(&mut self, outcome: Result<(), ClientError>) {
        self.connection = Some(match outcome {
            Ok(()) => ConnectionStatus::connected(),
            Err(error) => {
                tracing::debug!(error = %error, "connection check failed");
                ConnectionStatus::failed()
            }
        });
    }

    pub fn screenshot_fetched(&mut self, outcome: Result<Vec<u8>, ClientError>) {
        match outcome {
            Ok(bytes) => {
                self.screenshot
                    .replace(ScreenshotSource::Frame(ScreenshotFrame::new(bytes)));
                self.screenshot.updated_at = Some(clock_now());
                self.log(LogLevel::Success, "截图已刷新");
            }
            Err(ClientError::Http { .. }) => self.log(LogLevel::Error, "获取截图失败"),
            Err(error) => self.log(LogLevel::Error, format!("刷新截图失败: {error}")),
        }
    }

    /// Updates the elapsed display; a no-op while idle.
    pub fn tick_elapsed(&mut self, now: Instant) {
        if !self.execution.is_executing {
            return;
        }
        if let Some(started_at) = self.execution.started_at {
            self.elapsed_text = format_elapsed(now.saturating_duration_since(started_at));
        }
    }

    fn show_named_screenshot(&mut self, path: Option<&str>, timestamp: Option<&str>) {
        let Some(path) = path.map(str::trim).filter(|path| !path.is_empty()) else {
            return;
        };
        let url = named_screenshot_url(
            &self.backend_base_url,
            path,
            chrono::Utc::now().timestamp_millis(),
        );
        self.screenshot.replace(ScreenshotSource::Remote { url });
        self.stats.record_screenshot();
        if let Some(time) = timestamp.and_then(format_event_time) {
            self.screenshot.updated_at = Some(time);
        }
    }

    fn finish_execution(&mut self) {
        self.execution.is_executing = false;
    }
}

/// `m:ss`, minutes unbounded.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn clock_now() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Local clock time of an ISO-8601 timestamp. Timestamps without an offset
/// are taken as local time.
fn format_event_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Local).format("%H:%M:%S").to_string());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|parsed| parsed.format("%H:%M:%S").to_string())
}
