use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::routing::{get, post};
use mobile_agent_client::{
    ClientError, MobileAgentClient, StatusCode, StopTaskResponse, TaskEventStream,
};
use mobile_agent_dashboard::session::ScreenshotSource;
use mobile_agent_dashboard::{
    ControllerOptions, DashboardCommand, DashboardConfig, DashboardController, DashboardSession,
    DashboardTransport, LogLevel, NullView,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc, oneshot};

enum Script {
    Chunks(Vec<&'static str>),
    Fail(ClientError),
    Hang,
}

#[derive(Default)]
struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    executed: Mutex<Vec<String>>,
    stop_calls: AtomicUsize,
    ping_fails: bool,
    screenshot: Option<Vec<u8>>,
    /// When set, `stop_task` waits for a notification before answering.
    stop_gate: Option<Arc<Notify>>,
}

impl FakeTransport {
    fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed lock").clone()
    }
}

#[async_trait]
impl DashboardTransport for FakeTransport {
    async fn ping(&self) -> Result<(), ClientError> {
        if self.ping_fails {
            Err(ClientError::Request {
                message: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn execute_task(&self, instruction: &str) -> Result<TaskEventStream, ClientError> {
        self.executed
            .lock()
            .expect("executed lock")
            .push(instruction.to_string());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or(Script::Chunks(Vec::new()));
        match script {
            Script::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, ClientError>(chunk.as_bytes().to_vec())),
            ))),
            Script::Fail(error) => Err(error),
            Script::Hang => Ok(Box::pin(futures::stream::pending::<
                Result<Vec<u8>, ClientError>,
            >())),
        }
    }

    async fn stop_task(&self) -> Result<StopTaskResponse, ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.stop_gate {
            gate.notified().await;
        }
        Ok(StopTaskResponse {
            message: Some("正在停止任务...".to_string()),
        })
    }

    async fn latest_screenshot(&self) -> Result<Vec<u8>, ClientError> {
        self.screenshot.clone().ok_or_else(|| ClientError::Http {
            status: StatusCode::NOT_FOUND,
            body: "no screenshot".to_string(),
        })
    }
}

fn quiet_options() -> ControllerOptions {
    ControllerOptions {
        screenshot_poll: None,
        probe_on_start: false,
        exit_when_idle: false,
    }
}

async fn drive(
    transport: Arc<FakeTransport>,
    options: ControllerOptions,
    commands: Vec<DashboardCommand>,
) -> DashboardSession {
    let (tx, rx) = mpsc::channel(16);
    for command in commands {
        tx.send(command).await.expect("queue command");
    }
    drop(tx);
    DashboardController::new(transport, &DashboardConfig::default())
        .with_options(options)
        .run(rx, &mut NullView)
        .await
}

fn messages(session: &DashboardSession) -> Vec<(LogLevel, String)> {
    session
        .logs()
        .iter()
        .map(|entry| (entry.level, entry.message.clone()))
        .collect()
}

#[tokio::test]
async fn reference_run_updates_stats_and_returns_to_idle() {
    let transport = Arc::new(FakeTransport::with_scripts(vec![Script::Chunks(vec![
        "{\"type\":\"action\",\"action_type\":\"click\",\"action_inputs\":{\"x\":10,",
        "\"y\":20},\"success\":true}\n{\"type\":\"compl",
        "etion\",\"completed\":3,\"failed\":1,\"total\":4}\n",
    ])]));

    let session = drive(
        Arc::clone(&transport),
        ControllerOptions {
            exit_when_idle: true,
            ..quiet_options()
        },
        vec![DashboardCommand::Submit("  打开设置 ".to_string())],
    )
    .await;

    assert_eq!(transport.executed(), vec!["打开设置".to_string()]);
    assert!(!session.is_executing());
    assert_eq!(session.stats().total_actions, 1);
    assert_eq!(session.stats().successful_actions, 1);
    assert_eq!(
        messages(&session),
        vec![
            (LogLevel::Info, "开始执行任务: 打开设置".to_string()),
            (LogLevel::Success, r#"click: {"x":10,"y":20}"#.to_string()),
            (
                LogLevel::Success,
                "任务完成！成功: 3, 失败: 1, 总计: 4".to_string()
            ),
        ]
    );
    assert!(session.controls().input_enabled);
}

#[tokio::test]
async fn empty_instruction_never_reaches_the_server() {
    let transport = Arc::new(FakeTransport::default());

    let session = drive(
        Arc::clone(&transport),
        quiet_options(),
        vec![DashboardCommand::Submit("   ".to_string())],
    )
    .await;

    assert!(transport.executed().is_empty());
    assert_eq!(
        messages(&session).last(),
        Some(&(LogLevel::Error, "请输入任务指令".to_string()))
    );
}

#[tokio::test]
async fn second_submission_is_rejected_and_stop_settles() {
    let transport = Arc::new(FakeTransport::with_scripts(vec![Script::Hang]));

    let session = drive(
        Arc::clone(&transport),
        quiet_options(),
        vec![
            DashboardCommand::Submit("first".to_string()),
            DashboardCommand::Submit("second".to_string()),
            DashboardCommand::Stop,
            DashboardCommand::Stop,
        ],
    )
    .await;

    assert_eq!(transport.executed(), vec!["first".to_string()]);
    assert_eq!(transport.stop_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_executing());
    assert_eq!(
        messages(&session),
        vec![
            (LogLevel::Info, "开始执行任务: first".to_string()),
            (LogLevel::Warning, "任务正在执行中，请等待完成".to_string()),
            (LogLevel::Warning, "任务已停止".to_string()),
        ]
    );
}

#[tokio::test]
async fn late_stop_does_not_end_the_next_run() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(FakeTransport {
        scripts: Mutex::new(
            vec![
                Script::Chunks(vec![
                    "{\"type\":\"completion\",\"completed\":1,\"failed\":0,\"total\":1}\n",
                ]),
                Script::Hang,
            ]
            .into(),
        ),
        stop_gate: Some(Arc::clone(&gate)),
        ..FakeTransport::default()
    });
    let (tx, rx) = mpsc::channel(8);
    tx.send(DashboardCommand::Submit("a".to_string()))
        .await
        .expect("queue command");
    tx.send(DashboardCommand::Stop).await.expect("queue command");

    let commands = tx.clone();
    let mut submitted_b = false;
    let mut released_stop = false;
    let mut finished = false;
    let mut view = |session: &DashboardSession| {
        let run_id = session.execution().run_id();
        if !submitted_b && run_id == 1 && !session.is_executing() {
            submitted_b = true;
            let _ = commands.try_send(DashboardCommand::Submit("b".to_string()));
        }
        if !released_stop && run_id == 2 && session.is_executing() {
            released_stop = true;
            gate.notify_one();
        }
        let stop_logged = session
            .logs()
            .last()
            .is_some_and(|entry| entry.message == "任务已停止");
        if !finished && run_id == 2 && stop_logged {
            finished = true;
            let _ = commands.try_send(DashboardCommand::Submit("c".to_string()));
            let _ = commands.try_send(DashboardCommand::Shutdown);
        }
    };

    let session = DashboardController::new(Arc::clone(&transport), &DashboardConfig::default())
        .with_options(quiet_options())
        .run(rx, &mut view)
        .await;
    drop(tx);

    assert_eq!(transport.executed(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(transport.stop_calls.load(Ordering::SeqCst), 1);
    assert!(session.is_executing());
    assert_eq!(session.execution().run_id(), 2);
    assert_eq!(session.status_text(), "执行中");
    assert_eq!(
        messages(&session).last(),
        Some(&(LogLevel::Warning, "任务正在执行中，请等待完成".to_string()))
    );
}

#[tokio::test]
async fn rejected_submission_ends_a_single_run_session() {
    let transport = Arc::new(FakeTransport::default());
    let (tx, rx) = mpsc::channel(4);
    tx.send(DashboardCommand::Submit("  ".to_string()))
        .await
        .expect("queue command");

    let session = DashboardController::new(Arc::clone(&transport), &DashboardConfig::default())
        .with_options(ControllerOptions {
            exit_when_idle: true,
            ..quiet_options()
        })
        .run(rx, &mut NullView)
        .await;
    drop(tx);

    assert!(transport.executed().is_empty());
    assert_eq!(
        messages(&session).last(),
        Some(&(LogLevel::Error, "请输入任务指令".to_string()))
    );
}

#[tokio::test]
async fn stop_while_idle_does_nothing() {
    let transport = Arc::new(FakeTransport::default());

    let session = drive(
        Arc::clone(&transport),
        quiet_options(),
        vec![DashboardCommand::Stop],
    )
    .await;

    assert_eq!(transport.stop_calls.load(Ordering::SeqCst), 0);
    assert!(session.logs().is_empty());
}

#[tokio::test]
async fn request_failure_is_logged_and_reenables_input() {
    let transport = Arc::new(FakeTransport::with_scripts(vec![Script::Fail(
        ClientError::Http {
            status: StatusCode::BAD_REQUEST,
            body: "busy".to_string(),
        },
    )]));

    let session = drive(
        Arc::clone(&transport),
        ControllerOptions {
            exit_when_idle: true,
            ..quiet_options()
        },
        vec![DashboardCommand::Submit("run".to_string())],
    )
    .await;

    assert!(!session.is_executing());
    let (level, message) = messages(&session).pop().expect("failure log");
    assert_eq!(level, LogLevel::Error);
    assert_eq!(message, "任务执行失败: mobile_agent_http_400 Bad Request:busy");
}

#[tokio::test]
async fn stream_ending_without_completion_returns_to_idle() {
    let transport = Arc::new(FakeTransport::with_scripts(vec![Script::Chunks(vec![
        "{\"type\":\"subtask\",\"current\":1,\"total\":3}\n",
        "{\"type\":\"heartbeat\"}\nraw output line",
    ])]));

    let session = drive(
        Arc::clone(&transport),
        ControllerOptions {
            exit_when_idle: true,
            ..quiet_options()
        },
        vec![DashboardCommand::Submit("run".to_string())],
    )
    .await;

    assert!(!session.is_executing());
    assert_eq!(session.progress_text(), "1/3");
    assert_eq!(
        messages(&session)[1..],
        [
            (LogLevel::Warning, "未知更新类型: heartbeat".to_string()),
            (LogLevel::Info, "raw output line".to_string()),
            (
                LogLevel::Warning,
                "任务流已结束，未收到完成事件".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn clear_and_auto_scroll_commands_apply_in_order() {
    let transport = Arc::new(FakeTransport::default());

    let session = drive(
        transport,
        quiet_options(),
        vec![
            DashboardCommand::ToggleAutoScroll,
            DashboardCommand::ClearLogs,
            DashboardCommand::ToggleAutoScroll,
        ],
    )
    .await;

    assert!(session.auto_scroll());
    assert_eq!(
        messages(&session),
        vec![(LogLevel::Info, "自动滚动已开启".to_string())]
    );
    assert_eq!(session.logs().count_label(), "1 条日志");
}

#[tokio::test]
async fn startup_probe_reports_connection_failure() {
    let transport = Arc::new(FakeTransport {
        ping_fails: true,
        ..FakeTransport::default()
    });
    let (tx, rx) = mpsc::channel(4);
    let shutdown = tx.clone();
    let mut renders = 0usize;
    let mut view = |session: &DashboardSession| {
        renders += 1;
        if session.connection().is_some() {
            let _ = shutdown.try_send(DashboardCommand::Shutdown);
        }
    };

    let session = DashboardController::new(transport, &DashboardConfig::default())
        .with_options(ControllerOptions {
            probe_on_start: true,
            ..quiet_options()
        })
        .run(rx, &mut view)
        .await;
    drop(tx);

    let status = session.connection().expect("connection status");
    assert_eq!(status.label, "连接失败");
    assert!(renders >= 2);
}

#[tokio::test]
async fn manual_screenshot_refresh_holds_one_frame() {
    let transport = Arc::new(FakeTransport {
        screenshot: Some(vec![0xff, 0xd8, 0xff, 0xe0]),
        ..FakeTransport::default()
    });
    let (tx, rx) = mpsc::channel(4);
    tx.send(DashboardCommand::RefreshScreenshot)
        .await
        .expect("queue command");
    let shutdown = tx.clone();
    let mut view = |session: &DashboardSession| {
        if !session.screenshot().is_placeholder() {
            let _ = shutdown.try_send(DashboardCommand::Shutdown);
        }
    };

    let session = DashboardController::new(transport, &DashboardConfig::default())
        .with_options(quiet_options())
        .run(rx, &mut view)
        .await;

    match session.screenshot().source() {
        Some(ScreenshotSource::Frame(frame)) => assert_eq!(frame.bytes(), [0xff, 0xd8, 0xff, 0xe0]),
        other => panic!("expected frame, got {other:?}"),
    }
    assert_eq!(
        messages(&session),
        vec![(LogLevel::Success, "截图已刷新".to_string())]
    );
}

async fn spawn_task_server() -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let app = Router::new()
        .route("/ping", get(|| async { Json(json!({"message": "Hello, World!"})) }))
        .route(
            "/execute_task",
            post(|| async {
                let chunks = [
                    "{\"type\":\"log\",\"message\":\"开始任务分解...\",\"level\":\"info\"}\n",
                    "{\"type\":\"model_call\",\"model_name\":\"qwen\",",
                    "\"call_type\":\"plan\"}\n{\"type\":\"screenshot\",\"path\":\"s1.jpg\"}\n",
                    "{\"type\":\"completion\",\"completed\":1,\"failed\":0,\"total\":1}\n",
                ];
                Body::from_stream(futures::stream::iter(
                    chunks.into_iter().map(Ok::<_, Infallible>),
                ))
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    Ok((addr, shutdown_tx))
}

#[tokio::test]
async fn runs_a_task_against_a_live_http_server() -> anyhow::Result<()> {
    let (addr, shutdown) = spawn_task_server().await?;
    let base_url = format!("http://{addr}");
    let config = DashboardConfig {
        backend_base_url: base_url.clone(),
        frontend_base_url: base_url.clone(),
        screenshot_poll_ms: 0,
        ..DashboardConfig::default()
    };
    let client = Arc::new(MobileAgentClient::new(config.client_config())?);
    let (tx, rx) = mpsc::channel(4);
    tx.send(DashboardCommand::Submit("打开设置".to_string()))
        .await?;
    drop(tx);

    let session = DashboardController::new(client, &config)
        .with_options(ControllerOptions {
            screenshot_poll: None,
            probe_on_start: false,
            exit_when_idle: true,
        })
        .run(rx, &mut NullView)
        .await;
    let _ = shutdown.send(());

    assert!(!session.is_executing());
    assert_eq!(session.stats().model_calls, 1);
    assert_eq!(session.stats().screenshots, 1);
    match session.screenshot().source() {
        Some(ScreenshotSource::Remote { url }) => {
            assert!(url.starts_with(&format!("{base_url}/screenshot/s1.jpg?t=")));
        }
        other => panic!("expected remote screenshot, got {other:?}"),
    }
    let last = session.logs().last().expect("completion log");
    assert_eq!(last.message, "任务完成！成功: 1, 失败: 0, 总计: 1");
    Ok(())
}
