#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

//! Dashboard core for driving a mobile GUI agent: task submission, the
//! streamed update feed, statistics, logs and the device screenshot.

pub mod config;
pub mod controller;
pub mod events;
pub mod html;
pub mod log;
pub mod session;
pub mod stats;
pub mod stream;
pub mod transport;
pub mod view;

pub use config::{ConfigError, DashboardConfig};
pub use controller::{ControllerOptions, DashboardCommand, DashboardController};
pub use events::{DecodedLine, UpdateEvent, decode_line};
pub use html::{render_dashboard_html, render_log_entry};
pub use log::{LogBuffer, LogEntry, LogLevel};
pub use session::{DashboardSession, SubmitError, TaskTicket, format_elapsed};
pub use stats::{StatsPatch, StatsSnapshot};
pub use stream::{EventStreamDecoder, LineSplitter, RunUpdate, StreamUpdate};
pub use transport::DashboardTransport;
pub use view::{DashboardView, NullView};
