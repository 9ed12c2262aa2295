use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::log::{LogEntry, LogLevel};
use crate::session::{ConnectionState, DashboardSession, ScreenshotSource};

const FONT_AWESOME_CSS: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css";

/// Tailwind-style color and Font Awesome icon for a level.
#[must_use]
pub const fn level_style(level: LogLevel) -> (&'static str, &'static str) {
    match level {
        LogLevel::Info => ("text-blue-400", "fa-info-circle"),
        LogLevel::Success => ("text-green-400", "fa-check-circle"),
        LogLevel::Warning => ("text-yellow-400", "fa-exclamation-triangle"),
        LogLevel::Error => ("text-red-400", "fa-times-circle"),
    }
}

/// Full dashboard snapshot as a standalone HTML page.
pub fn render_dashboard_html(session: &DashboardSession) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="zh-CN" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { "Mobile Agent 控制台" }
                link rel="stylesheet" href=(FONT_AWESOME_CSS);
                style { (PreEscaped(styles())) }
            }
            body {
                main class="ma-shell" {
                    header class="ma-header" {
                        h1 { "Mobile Agent 控制台" }
                        (connection_indicator(session))
                    }
                    div class="ma-grid" {
                        section class="ma-panel" {
                            (status_panel(session))
                            (stats_panel(session))
                        }
                        section class="ma-panel" {
                            (screenshot_panel(session))
                        }
                    }
                    section class="ma-panel" id="log-panel" {
                        div class="ma-log-header" {
                            h2 { "执行日志" }
                            span id="log-count" { (session.logs().count_label()) }
                            @if session.logs().evicted() > 0 {
                                span id="log-evicted" class="text-gray-500" {
                                    "(已丢弃最早的 " (session.logs().evicted()) " 条)"
                                }
                            }
                        }
                        div id="log-container" class="ma-log" {
                            @for entry in session.logs().iter() {
                                (log_entry_markup(entry))
                            }
                        }
                    }
                }
            }
        }
    };

    markup.into_string()
}

/// A single log row, as appended to the log container.
pub fn render_log_entry(entry: &LogEntry) -> String {
    log_entry_markup(entry).into_string()
}

fn log_entry_markup(entry: &LogEntry) -> Markup {
    let (color, icon) = level_style(entry.level);
    html! {
        div class={"log-entry mb-1 " (color)} data-seq=(entry.seq) data-level=(entry.level.as_str()) {
            span class="text-gray-500" { "[" (entry.timestamp) "]" }
            " "
            i class={"fas " (icon) " mr-1"} {}
            (entry.message)
        }
    }
}

fn connection_indicator(session: &DashboardSession) -> Markup {
    match session.connection() {
        Some(status) => {
            let class = match status.state {
                ConnectionState::Connected => "ma-dot success",
                ConnectionState::Error => "ma-dot error",
            };
            html! {
                div id="connection-status" data-state=(status.state.as_str()) {
                    span class=(class) {}
                    span { (status.label) }
                }
            }
        }
        None => html! {
            div id="connection-status" data-state="unknown" {
                span class="ma-dot" {}
                span { "检查中..." }
            }
        },
    }
}

fn status_panel(session: &DashboardSession) -> Markup {
    let controls = session.controls();
    html! {
        dl class="ma-status" {
            dt { "状态" } dd id="current-status" { (session.status_text()) }
            dt { "进度" } dd id="current-progress" { (session.progress_text()) }
            dt { "用时" } dd id="execution-time" { (session.elapsed_text()) }
        }
        form class="ma-controls" {
            @if controls.input_enabled {
                input id="task-input" type="text" placeholder="输入任务指令";
            } @else {
                input id="task-input" type="text" placeholder="输入任务指令" disabled;
            }
            @if controls.submit_visible {
                button id="execute-btn" type="button" { "执行" }
            }
            @if controls.stop_visible {
                button id="stop-btn" type="button" { "停止" }
            }
        }
    }
}

fn stats_panel(session: &DashboardSession) -> Markup {
    let stats = session.stats();
    html! {
        ul class="ma-stats" {
            li { "总操作数 " strong id="total-actions" { (stats.total_actions) } }
            li { "成功操作 " strong id="successful-actions" { (stats.successful_actions) } }
            li { "模型调用 " strong id="model-calls" { (stats.model_calls) } }
            li { "截图次数 " strong id="screenshot-count" { (stats.screenshots) } }
            li { "成功率 " strong id="success-rate" { (stats.success_rate_label()) } }
        }
    }
}

fn screenshot_panel(session: &DashboardSession) -> Markup {
    let surface = session.screenshot();
    html! {
        h2 { "设备截图" }
        @match surface.source() {
            Some(ScreenshotSource::Remote { url }) => {
                img id="screenshot-img" src=(url) alt="设备截图";
            }
            Some(ScreenshotSource::Frame(frame)) => {
                img id="screenshot-img" src=(frame.data_url()) alt="设备截图";
            }
            None => {
                div id="screenshot-placeholder" class="ma-placeholder" {
                    i class="fas fa-mobile-alt" {}
                    p { "暂无截图" }
                }
            }
        }
        @if let Some(updated_at) = surface.updated_at() {
            p class="ma-muted" { "更新于 " span id="screenshot-time" { (updated_at) } }
        }
    }
}

fn styles() -> &'static str {
    r#"
body { margin: 0; background: #111827; color: #e5e7eb; font-family: system-ui, sans-serif; }
.ma-shell { max-width: 1200px; margin: 0 auto; padding: 24px; }
.ma-header { display: flex; justify-content: space-between; align-items: center; }
.ma-grid { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; }
.ma-panel { background: #1f2937; border-radius: 8px; padding: 16px; margin-top: 16px; }
.ma-dot { display: inline-block; width: 10px; height: 10px; border-radius: 50%; background: #6b7280; margin-right: 6px; }
.ma-dot.success { background: #34d399; }
.ma-dot.error { background: #f87171; }
.ma-log { font-family: ui-monospace, monospace; font-size: 13px; max-height: 480px; overflow-y: auto; }
.ma-log-header { display: flex; justify-content: space-between; }
.ma-muted, .text-gray-500 { color: #6b7280; }
.text-blue-400 { color: #60a5fa; }
.text-green-400 { color: #4ade80; }
.text-yellow-400 { color: #facc15; }
.text-red-400 { color: #f87171; }
.mb-1 { margin-bottom: 4px; }
.mr-1 { margin-right: 4px; }
#screenshot-img { max-width: 100%; border-radius: 6px; }
"#
}
