use std::io::Write;

use mobile_agent_dashboard::session::ConnectionState;
use mobile_agent_dashboard::{DashboardSession, DashboardView, LogEntry, LogLevel};

/// Line-oriented rendering of the dashboard for a terminal.
///
/// New log entries are printed once, in `seq` order. While auto-scroll is off
/// they are held back and printed together when it is turned on again.
pub struct TerminalView<W: Write> {
    out: W,
    printed_seq: u64,
    auto_scroll: bool,
    last_status: Option<String>,
    last_connection: Option<String>,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed_seq: 0,
            auto_scroll: true,
            last_status: None,
            last_connection: None,
        }
    }

    fn write_frame(&mut self, session: &DashboardSession) -> std::io::Result<()> {
        if let Some(status) = session.connection() {
            let line = match status.state {
                ConnectionState::Connected => format!("● {}", status.label),
                ConnectionState::Error => format!("○ {}", status.label),
            };
            if self.last_connection.as_deref() != Some(line.as_str()) {
                writeln!(self.out, "{line}")?;
                self.last_connection = Some(line);
            }
        }

        // The render that turns auto-scroll off still flushes, so its own
        // notice is visible.
        let flush = session.auto_scroll() || self.auto_scroll;
        self.auto_scroll = session.auto_scroll();
        if flush {
            let mut printed = self.printed_seq;
            for entry in session.logs().entries_after(self.printed_seq) {
                writeln!(self.out, "{}", format_entry(entry))?;
                printed = entry.seq;
            }
            self.printed_seq = printed;
        }

        let status = status_line(session);
        if self.last_status.as_deref() != Some(status.as_str()) {
            writeln!(self.out, "{status}")?;
            self.last_status = Some(status);
        }
        self.out.flush()
    }
}

impl<W: Write> DashboardView for TerminalView<W> {
    fn render(&mut self, session: &DashboardSession) {
        if let Err(error) = self.write_frame(session) {
            tracing::warn!(error = %error, "terminal render failed");
        }
    }
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INFO",
        LogLevel::Success => " OK ",
        LogLevel::Warning => "WARN",
        LogLevel::Error => "ERR ",
    }
}

pub fn format_entry(entry: &LogEntry) -> String {
    format!(
        "[{}] {} {}",
        entry.timestamp,
        level_tag(entry.level),
        entry.message
    )
}

pub fn status_line(session: &DashboardSession) -> String {
    let stats = session.stats();
    format!(
        "-- {} | 进度 {} | 用时 {} | 操作 {}/{} | 成功率 {} | 模型调用 {} | 截图 {}",
        session.status_text(),
        session.progress_text(),
        session.elapsed_text(),
        stats.successful_actions,
        stats.total_actions,
        stats.success_rate_label(),
        stats.model_calls,
        stats.screenshots,
    )
}
