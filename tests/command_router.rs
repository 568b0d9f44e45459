use std::error::Error;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use stackd::dns::DnsServer;
use stackd::engine::router::{
    DNS_START_COMMAND, DNS_STOP_COMMAND, HTTP_SERVE_RUN_COMMAND, HTTP_SERVE_STOP_COMMAND,
    PASSWORD_CHECK_COMMAND,
};
use stackd::engine::{CommandRouter, Coordinator, UiMessage, UiPayload};
use stackd::errors::{Result as StackdResult, StackdError};
use stackd::fs::mock::MockFileSystem;
use stackd::protocol::Status;
use stackd::service::{pid_file_path, ServiceManager, StopOutcome};
use stackd::session::{SessionHandle, SessionManager, ShellSpec, RESIZE_COMMAND, WRITE_COMMAND};
use stackd::state::SnapshotStore;
use stackd::types::ServiceType;
use stackd_test_utils::builders::{collect_until_terminal, drain_ui, success_frame, StateBuilder};
use stackd_test_utils::fake_pty::FakePtyBackend;
use stackd_test_utils::fake_services::{test_filter, RecordingElevator, ScriptedProcessTable};
use stackd_test_utils::fake_worker::{FakeWorkerBackend, WorkerStep};
use stackd_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const HOSTS: &str = "/etc/hosts";

struct Harness {
    router: CommandRouter,
    ui: mpsc::UnboundedReceiver<UiMessage>,
    workers: FakeWorkerBackend,
    pty: FakePtyBackend,
    fs: MockFileSystem,
    elevator: RecordingElevator,
}

fn harness(processes: ScriptedProcessTable) -> Harness {
    init_tracing();
    let workers = FakeWorkerBackend::new();
    let pty = FakePtyBackend::new();
    let fs = MockFileSystem::new();
    let elevator = RecordingElevator::accepting("correct horse");

    let (ui_tx, ui) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        Arc::new(workers.clone()),
        SnapshotStore::new(StateBuilder::new("/srv/stackd").build()),
        ui_tx.clone(),
    );
    let (manager, events) =
        SessionManager::new(Arc::new(pty.clone()), ShellSpec::login_shell(), ui_tx);
    let session = SessionHandle::spawn(manager, events);
    let services = ServiceManager::new(
        Arc::new(fs.clone()),
        Arc::new(processes),
        Arc::new(elevator.clone()),
        test_filter(),
    );
    let router = CommandRouter::new(coordinator, session, services).with_hosts_file(HOSTS);

    Harness {
        router,
        ui,
        workers,
        pty,
        fs,
        elevator,
    }
}

fn only_status(messages: &[UiMessage]) -> &Status {
    assert_eq!(messages.len(), 1, "{messages:?}");
    match &messages[0].payload {
        UiPayload::Status(status) => status,
        other => panic!("expected a status, got {other:?}"),
    }
}

#[tokio::test]
async fn correct_password_is_stored_and_acknowledged() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));

    h.router
        .handle_command(PASSWORD_CHECK_COMMAND, "pw-1", vec![json!("correct horse")])
        .await?;

    let messages = drain_ui(&mut h.ui);
    assert_eq!(only_status(&messages), &Status::Success(json!(true)));
    assert_eq!(
        h.router
            .coordinator()
            .store()
            .current()
            .password
            .as_ref()
            .map(|p| p.expose().to_string()),
        Some("correct horse".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected_without_touching_the_snapshot() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));

    h.router
        .handle_command(PASSWORD_CHECK_COMMAND, "pw-2", vec![json!("battery staple")])
        .await?;

    let messages = drain_ui(&mut h.ui);
    assert_eq!(only_status(&messages), &Status::Success(json!(false)));
    assert!(h.router.coordinator().store().current().password.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_commands_are_an_error() {
    let mut h = harness(ScriptedProcessTable::with(&[]));
    let result = h.router.handle_command("app:reboot", "x", vec![]).await;
    assert!(matches!(result, Err(StackdError::UnknownCommand(name)) if name == "app:reboot"));
    assert!(drain_ui(&mut h.ui).is_empty());
}

#[tokio::test]
async fn fork_commands_go_to_a_worker() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));
    h.workers.push_script(vec![WorkerStep::Frame(success_frame(
        "app-fork:nginx",
        "ng-1",
        json!("started"),
    ))]);

    h.router
        .handle_command("app-fork:nginx", "ng-1", vec![json!("startService")])
        .await?;

    let messages = with_timeout(collect_until_terminal(&mut h.ui, "ng-1")).await;
    assert_eq!(only_status(&messages), &Status::Success(json!("started")));
    assert_eq!(h.workers.spawned(), 1);
    Ok(())
}

#[tokio::test]
async fn session_commands_reach_the_shell() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));

    h.router
        .handle_command(WRITE_COMMAND, "sh-1", vec![json!("echo hi\r")])
        .await?;
    h.router
        .handle_command(RESIZE_COMMAND, "sh-2", vec![json!({"cols": 100, "rows": 30})])
        .await?;
    assert_eq!(h.pty.writes(), vec!["echo hi\r"]);
    assert_eq!(h.pty.resizes(), vec![(100, 30)]);

    h.router
        .handle_command(RESIZE_COMMAND, "sh-3", vec![json!("wide")])
        .await?;
    let messages = drain_ui(&mut h.ui);
    assert!(matches!(only_status(&messages), Status::Failure(_)));
    assert_eq!(messages[0].key, "sh-3");
    Ok(())
}

#[tokio::test]
async fn dns_without_a_server_fails_for_the_key() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));
    h.router.handle_command(DNS_START_COMMAND, "dns-1", vec![]).await?;
    let messages = drain_ui(&mut h.ui);
    assert!(matches!(only_status(&messages), Status::Failure(_)));
    assert!(!h.router.dns_started());
    Ok(())
}

#[derive(Debug, Default)]
struct FakeDns {
    starts: Mutex<Vec<bool>>,
    closes: Mutex<usize>,
}

impl DnsServer for FakeDns {
    fn start(
        &self,
        previously_started: bool,
    ) -> Pin<Box<dyn Future<Output = StackdResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.starts.lock().unwrap().push(previously_started);
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = StackdResult<()>> + Send + '_>> {
        Box::pin(async move {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        })
    }
}

#[tokio::test]
async fn dns_start_remembers_previous_success() -> TestResult {
    let h = harness(ScriptedProcessTable::with(&[]));
    let dns = Arc::new(FakeDns::default());
    let router = h.router.clone().with_dns(dns.clone());
    let mut ui = h.ui;

    router.handle_command(DNS_START_COMMAND, "d1", vec![]).await?;
    router.handle_command(DNS_START_COMMAND, "d2", vec![]).await?;
    assert!(router.dns_started());
    router.handle_command(DNS_STOP_COMMAND, "d3", vec![]).await?;
    assert!(!router.dns_started());

    assert_eq!(*dns.starts.lock().unwrap(), vec![false, true]);
    assert_eq!(*dns.closes.lock().unwrap(), 1);
    let messages = drain_ui(&mut ui);
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|m| m.payload == UiPayload::Status(Status::Success(json!(true)))));
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_dns_ends_the_session_and_stops_services() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[(
        88,
        "/srv/stackd/server/memcached/bin/memcached -p 11211",
    )]));
    let state = h.router.coordinator().store().current();
    h.fs.add_file(pid_file_path(&state, ServiceType::Memcached), "88");
    h.fs.add_file(HOSTS, "#X-HOSTS-BEGIN#\n127.0.0.1 a.test\n#X-HOSTS-END#\n");

    h.router
        .handle_command(WRITE_COMMAND, "sh-9", vec![json!("tail -f log\r")])
        .await?;
    let dns = Arc::new(FakeDns::default());
    let router = h.router.clone().with_dns(dns.clone());
    router.handle_command(DNS_START_COMMAND, "dns-9", vec![]).await?;
    assert!(router.dns_started());
    drain_ui(&mut h.ui);

    let outcomes = router.shutdown().await;
    assert_eq!(*dns.closes.lock().unwrap(), 1);
    assert!(!router.dns_started());

    let memcached = outcomes
        .iter()
        .find(|(s, _)| *s == ServiceType::Memcached)
        .map(|(_, o)| o.clone());
    assert_eq!(
        memcached,
        Some(StopOutcome::Signalled {
            command: "kill -INT 88".to_string(),
            pids: vec![88],
        })
    );
    assert_eq!(h.elevator.runs().len(), 1);
    assert_eq!(h.pty.kills(), 1);
    assert_eq!(h.fs.contents(Path::new(HOSTS)).unwrap(), b"\n".to_vec());

    let messages = drain_ui(&mut h.ui);
    assert_eq!(only_status(&messages), &Status::Success(json!(true)));
    assert_eq!(messages[0].key, "sh-9");
    Ok(())
}

async fn http_get(port: u16, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).to_lowercase())
}

fn served_port(messages: &[UiMessage]) -> u16 {
    match only_status(messages) {
        Status::Success(info) => info["port"].as_u64().and_then(|p| u16::try_from(p).ok()).unwrap(),
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn http_serve_runs_reruns_and_stops_per_directory() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));
    let site = tempfile::tempdir()?;
    std::fs::write(site.path().join("index.html"), "<h1>hello</h1>")?;
    std::fs::create_dir(site.path().join("assets"))?;
    std::fs::write(site.path().join("assets/app.js"), "console.log(1)")?;
    let dir = site.path().to_string_lossy().into_owned();

    h.router
        .handle_command(HTTP_SERVE_RUN_COMMAND, "http-1", vec![json!(dir)])
        .await?;
    let messages = drain_ui(&mut h.ui);
    let port = served_port(&messages);
    assert_eq!(
        only_status(&messages),
        &Status::Success(json!({
            "path": dir,
            "port": port,
            "host": format!("http://localhost:{port}/"),
        }))
    );

    let index = with_timeout(http_get(port, "/")).await?;
    assert!(index.starts_with("http/1.1 200"), "{index}");
    assert!(index.contains("access-control-allow-origin: *"));
    assert!(index.contains("access-control-allow-methods: *"));
    assert!(index.contains("<h1>hello</h1>"));
    let script = with_timeout(http_get(port, "/assets/app.js")).await?;
    assert!(script.contains("content-type: text/javascript"));
    let missing = with_timeout(http_get(port, "/nope.html")).await?;
    assert!(missing.starts_with("http/1.1 404"));

    h.router
        .handle_command(HTTP_SERVE_RUN_COMMAND, "http-2", vec![json!(dir)])
        .await?;
    let rerun_port = served_port(&drain_ui(&mut h.ui));
    let current = h.router.static_servers().get(site.path()).map(|s| s.port);
    assert_eq!(current, Some(rerun_port));
    assert!(with_timeout(http_get(rerun_port, "/")).await?.contains("hello"));

    h.router
        .handle_command(HTTP_SERVE_STOP_COMMAND, "http-3", vec![json!(dir)])
        .await?;
    let messages = drain_ui(&mut h.ui);
    assert_eq!(only_status(&messages), &Status::Success(json!({ "path": dir })));
    assert!(h.router.static_servers().get(site.path()).is_none());

    with_timeout(async {
        while TcpStream::connect(("127.0.0.1", rerun_port)).await.is_ok() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn http_serve_of_a_missing_directory_fails() -> TestResult {
    let mut h = harness(ScriptedProcessTable::with(&[]));
    h.router
        .handle_command(HTTP_SERVE_RUN_COMMAND, "http-4", vec![json!("/no/such/dir")])
        .await?;
    let messages = drain_ui(&mut h.ui);
    assert!(matches!(only_status(&messages), Status::Failure(_)));
    Ok(())
}
