#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mobile_agent_client::MobileAgentClient;
use mobile_agent_dashboard::session::STATUS_FAILED;
use mobile_agent_dashboard::{
    DashboardCommand, DashboardConfig, DashboardController, DashboardSession,
    render_dashboard_html,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod terminal;

use terminal::TerminalView;

#[derive(Parser, Debug)]
#[command(name = "mobile-agent")]
#[command(about = "Drive a mobile GUI agent from the terminal")]
struct Cli {
    /// Device server base URL. Overrides MOBILE_AGENT_BACKEND_URL.
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// Task server base URL. Overrides MOBILE_AGENT_FRONTEND_URL.
    #[arg(long, global = true)]
    frontend_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one task and follow its progress until it settles.
    Run(RunArgs),
    /// Read instructions and `:` commands from stdin.
    Interactive,
    /// Check that the device server is reachable.
    Ping,
    /// Show the task server's status and statistics.
    Status,
    /// Save the latest device screenshot.
    Screenshot(ScreenshotArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Natural-language instruction for the agent.
    #[arg(required_unless_present = "preset", conflicts_with = "preset")]
    instruction: Option<String>,
    #[arg(long, value_enum)]
    preset: Option<Preset>,
    /// Write an HTML snapshot of the final dashboard here.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ScreenshotArgs {
    #[arg(long, default_value = "screenshot.jpg")]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    Settings,
    Wechat,
    Browser,
    Unicom,
}

impl Preset {
    fn instruction(self) -> &'static str {
        match self {
            Self::Settings => "打开设置",
            Self::Wechat => "打开微信",
            Self::Browser => "打开浏览器",
            Self::Unicom => "打开中国联通，打开腾讯视频VIP月卡+10G定向流量的权益界面",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name.trim(), true).ok()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    tracing::debug!(
        backend = %config.backend_base_url,
        frontend = %config.frontend_base_url,
        "configuration resolved"
    );

    match cli.command {
        Commands::Run(args) => {
            let instruction = match (args.instruction, args.preset) {
                (Some(instruction), _) => instruction,
                (None, Some(preset)) => preset.instruction().to_string(),
                (None, None) => bail!("an instruction or --preset is required"),
            };
            run_task(&config, instruction, args.report).await
        }
        Commands::Interactive => run_interactive(&config).await,
        Commands::Ping => ping(&config).await,
        Commands::Status => status(&config).await,
        Commands::Screenshot(args) => save_screenshot(&config, args.out).await,
    }
}

fn resolve_config(cli: &Cli) -> Result<DashboardConfig> {
    let mut config = DashboardConfig::from_env().context("read MOBILE_AGENT_* environment")?;
    if let Some(url) = cli.backend_url.as_deref() {
        config.backend_base_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(url) = cli.frontend_url.as_deref() {
        config.frontend_base_url = url.trim().trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn build_client(config: &DashboardConfig) -> Result<Arc<MobileAgentClient>> {
    let client = MobileAgentClient::new(config.client_config()).context("build http client")?;
    Ok(Arc::new(client))
}

async fn run_task(
    config: &DashboardConfig,
    instruction: String,
    report: Option<PathBuf>,
) -> Result<()> {
    let client = build_client(config)?;
    let (tx, rx) = mpsc::channel(8);
    tx.send(DashboardCommand::Submit(instruction))
        .await
        .context("queue task")?;
    tokio::spawn(relay_interrupts(tokio::signal::ctrl_c, tx.clone()));
    drop(tx);

    let mut view = TerminalView::new(std::io::stdout());
    let session = DashboardController::new(client, config)
        .exit_when_idle(true)
        .run(rx, &mut view)
        .await;

    if let Some(path) = report {
        write_report(&session, &path)?;
        eprintln!("report written to {}", path.display());
    }
    if session.status_text() == STATUS_FAILED {
        bail!("task failed");
    }
    Ok(())
}

/// First interrupt asks the task server to stop; a second one shuts the
/// dashboard down without waiting for the stop to settle.
async fn relay_interrupts<F, Fut>(mut next_interrupt: F, commands: mpsc::Sender<DashboardCommand>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    for command in [DashboardCommand::Stop, DashboardCommand::Shutdown] {
        if let Err(error) = next_interrupt().await {
            tracing::warn!(error = %error, "interrupt listener failed");
            return;
        }
        tracing::info!(?command, "interrupt received");
        if commands.send(command).await.is_err() {
            return;
        }
    }
}

async fn run_interactive(config: &DashboardConfig) -> Result<()> {
    let client = build_client(config)?;
    let (tx, rx) = mpsc::channel(32);

    eprintln!("输入任务指令后回车执行；命令: :stop :clear :ping :shot :scroll :preset <name> :quit");
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(error = %error, "stdin read failed");
                    break;
                }
            };
            let Some(command) = parse_repl_line(&line) else {
                continue;
            };
            let shutdown = command == DashboardCommand::Shutdown;
            if tx.send(command).await.is_err() || shutdown {
                break;
            }
        }
    });

    let mut view = TerminalView::new(std::io::stdout());
    DashboardController::new(client, config)
        .run(rx, &mut view)
        .await;
    reader.abort();
    Ok(())
}

/// Maps one line of interactive input to a command. Blank lines are ignored.
fn parse_repl_line(line: &str) -> Option<DashboardCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix(':') else {
        return Some(DashboardCommand::Submit(line.to_string()));
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    match name {
        "stop" => Some(DashboardCommand::Stop),
        "clear" => Some(DashboardCommand::ClearLogs),
        "ping" => Some(DashboardCommand::RefreshConnection),
        "shot" => Some(DashboardCommand::RefreshScreenshot),
        "scroll" => Some(DashboardCommand::ToggleAutoScroll),
        "quit" | "q" => Some(DashboardCommand::Shutdown),
        "preset" => match Preset::from_name(rest) {
            Some(preset) => Some(DashboardCommand::Submit(preset.instruction().to_string())),
            None => {
                eprintln!("unknown preset: {}", rest.trim());
                None
            }
        },
        _ => {
            eprintln!("unknown command: :{name}");
            None
        }
    }
}

async fn ping(config: &DashboardConfig) -> Result<()> {
    let client = build_client(config)?;
    match client.ping().await {
        Ok(()) => {
            println!("已连接 {}", client.backend_base_url());
            Ok(())
        }
        Err(error) => {
            println!("连接失败 {}", client.backend_base_url());
            Err(error).context("ping device server")
        }
    }
}

async fn status(config: &DashboardConfig) -> Result<()> {
    let client = build_client(config)?;
    let status = client
        .server_status()
        .await
        .context("fetch task server status")?;
    let stats = client
        .server_stats()
        .await
        .context("fetch task server stats")?;

    println!("状态: {}", status.status);
    println!("运行中: {}", if status.is_running { "是" } else { "否" });
    if let Some(task) = status.current_task.as_deref() {
        println!("当前任务: {task}");
    }
    println!(
        "进度: {}/{}",
        status.progress.current, status.progress.total
    );
    println!("总操作数: {}", stats.total_actions);
    println!("模型调用: {}", stats.model_calls);
    println!("执行时间: {:.1}s", stats.execution_time);
    println!("成功率: {:.1}%", stats.success_rate * 100.0);
    Ok(())
}

async fn save_screenshot(config: &DashboardConfig, out: PathBuf) -> Result<()> {
    let client = build_client(config)?;
    let bytes = client
        .latest_screenshot()
        .await
        .context("fetch latest screenshot")?;
    std::fs::write(&out, &bytes).with_context(|| format!("write {}", out.display()))?;
    println!("{} bytes -> {}", bytes.len(), out.display());
    Ok(())
}

fn write_report(session: &DashboardSession, path: &std::path::Path) -> Result<()> {
    std::fs::write(path, render_dashboard_html(session))
        .with_context(|| format!("write report {}", path.display()))
}
