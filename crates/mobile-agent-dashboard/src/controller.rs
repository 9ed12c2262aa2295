//! The owner loop: one task holds the session and applies everything that
//! happens to it, in arrival order.

use std::sync::Arc;
use std::time::Duration;

use mobile_agent_client::{ClientError, StopTaskResponse};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::config::{DashboardConfig, ELAPSED_TICK};
use crate::session::DashboardSession;
use crate::stream::{RunUpdate, consume_task_stream};
use crate::transport::DashboardTransport;
use crate::view::DashboardView;

const RUN_UPDATE_BUFFER: usize = 256;
const BACKGROUND_BUFFER: usize = 16;

/// User actions accepted by [`DashboardController::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardCommand {
    Submit(String),
    Stop,
    ClearLogs,
    RefreshConnection,
    RefreshScreenshot,
    ToggleAutoScroll,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub screenshot_poll: Option<Duration>,
    pub probe_on_start: bool,
    /// Return once the first submission has settled, whether it was accepted
    /// or rejected.
    pub exit_when_idle: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            screenshot_poll: DashboardConfig::default().screenshot_poll_interval(),
            probe_on_start: true,
            exit_when_idle: false,
        }
    }
}

#[derive(Debug)]
enum Background {
    Connection(Result<(), ClientError>),
    Screenshot(Result<Vec<u8>, ClientError>),
    Stop {
        run_id: u64,
        outcome: Result<StopTaskResponse, ClientError>,
    },
}

pub struct DashboardController<T: DashboardTransport + ?Sized> {
    transport: Arc<T>,
    session: DashboardSession,
    options: ControllerOptions,
    stop_in_flight: bool,
}

impl<T> DashboardController<T>
where
    T: DashboardTransport + ?Sized + 'static,
{
    pub fn new(transport: Arc<T>, config: &DashboardConfig) -> Self {
        Self {
            transport,
            session: DashboardSession::from_config(config),
            options: ControllerOptions {
                screenshot_poll: config.screenshot_poll_interval(),
                ..ControllerOptions::default()
            },
            stop_in_flight: false,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.options.exit_when_idle = exit_when_idle;
        self
    }

    #[must_use]
    pub fn session(&self) -> &DashboardSession {
        &self.session
    }

    /// Drives the session until `Shutdown`, until the command channel closes
    /// while idle, or (with `exit_when_idle`) until the first submission settles.
    /// Returns the final session.
    pub async fn run<V>(
        mut self,
        mut commands: mpsc::Receiver<DashboardCommand>,
        view: &mut V,
    ) -> DashboardSession
    where
        V: DashboardView + ?Sized,
    {
        let (run_tx, mut run_rx) = mpsc::channel::<RunUpdate>(RUN_UPDATE_BUFFER);
        let (background_tx, mut background_rx) = mpsc::channel::<Background>(BACKGROUND_BUFFER);

        let mut elapsed = ticker(ELAPSED_TICK);
        let mut screenshot_poll = self.options.screenshot_poll.map(ticker);
        let mut commands_open = true;
        let mut submitted = false;

        if self.options.probe_on_start {
            self.spawn_connection_probe(&background_tx);
        }
        view.render(&self.session);

        loop {
            tokio::select! {
                command = commands.recv(), if commands_open => {
                    match command {
                        Some(DashboardCommand::Shutdown) => {
                            tracing::info!("dashboard shutdown requested");
                            break;
                        }
                        Some(command) => {
                            submitted |= self.handle_command(command, &run_tx, &background_tx);
                        }
                        None => commands_open = false,
                    }
                }
                update = run_rx.recv() => {
                    let Some(update) = update else {
                        break;
                    };
                    self.session.apply_run_update(update);
                }
                result = background_rx.recv() => {
                    let Some(result) = result else {
                        break;
                    };
                    self.handle_background(result);
                }
                _ = elapsed.tick() => {
                    self.session.tick_elapsed(Instant::now().into_std());
                }
                _ = poll_tick(&mut screenshot_poll) => {
                    if !self.session.is_executing() {
                        self.spawn_screenshot_fetch(&background_tx);
                    }
                }
            }

            view.render(&self.session);

            let idle = !self.session.is_executing() && !self.stop_in_flight;
            if idle && self.options.exit_when_idle && submitted {
                break;
            }
            if idle && !commands_open {
                break;
            }
        }

        self.session
    }

    /// Returns whether the command was a submission.
    fn handle_command(
        &mut self,
        command: DashboardCommand,
        run_tx: &mpsc::Sender<RunUpdate>,
        background_tx: &mpsc::Sender<Background>,
    ) -> bool {
        match command {
            DashboardCommand::Submit(instruction) => {
                let Ok(ticket) = self
                    .session
                    .begin_task(&instruction, Instant::now().into_std())
                else {
                    return true;
                };
                tracing::info!(run_id = ticket.run_id, instruction = %ticket.instruction, "task submitted");
                tokio::spawn(consume_task_stream(
                    Arc::clone(&self.transport),
                    ticket.instruction,
                    ticket.run_id,
                    run_tx.clone(),
                ));
                return true;
            }
            DashboardCommand::Stop => {
                if self.session.can_stop() && !self.stop_in_flight {
                    self.stop_in_flight = true;
                    let run_id = self.session.execution().run_id();
                    let transport = Arc::clone(&self.transport);
                    let background_tx = background_tx.clone();
                    tokio::spawn(async move {
                        let outcome = transport.stop_task().await;
                        let _ = background_tx.send(Background::Stop { run_id, outcome }).await;
                    });
                }
            }
            DashboardCommand::ClearLogs => self.session.clear_logs(),
            DashboardCommand::RefreshConnection => {
                self.session.begin_connection_refresh();
                self.spawn_connection_probe(background_tx);
            }
            DashboardCommand::RefreshScreenshot => self.spawn_screenshot_fetch(background_tx),
            DashboardCommand::ToggleAutoScroll => {
                self.session.toggle_auto_scroll();
            }
            DashboardCommand::Shutdown => {}
        }
        false
    }

    fn handle_background(&mut self, result: Background) {
        match result {
            Background::Connection(outcome) => self.session.connection_checked(outcome),
            Background::Screenshot(outcome) => {
                if let Err(error) = &outcome {
                    tracing::warn!(error = %error, "screenshot refresh failed");
                }
                self.session.screenshot_fetched(outcome);
            }
            Background::Stop { run_id, outcome } => {
                self.stop_in_flight = false;
                match &outcome {
                    Ok(_) => tracing::info!(run_id, "task stopped"),
                    Err(error) => tracing::warn!(run_id, error = %error, "stop request failed"),
                }
                self.session.stop_settled(run_id, outcome);
            }
        }
    }

    fn spawn_connection_probe(&self, background_tx: &mpsc::Sender<Background>) {
        let transport = Arc::clone(&self.transport);
        let background_tx = background_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.ping().await;
            let _ = background_tx.send(Background::Connection(outcome)).await;
        });
    }

    fn spawn_screenshot_fetch(&self, background_tx: &mpsc::Sender<Background>) {
        let transport = Arc::clone(&self.transport);
        let background_tx = background_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.latest_screenshot().await;
            let _ = background_tx.send(Background::Screenshot(outcome)).await;
        });
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn poll_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
