use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use stackd::engine::{Coordinator, RequestOptions, UiPayload};
use stackd::errors::Result as StackdResult;
use stackd::exec::{WorkerBackend, WorkerLink, WorkerProcess};
use stackd::fs::mock::MockFileSystem;
use stackd::fs::FileSystem;
use stackd::protocol::{Envelope, FrameReader, FrameWriter, Status, WorkerMessage};
use stackd::state::SnapshotStore;
use stackd::types::WorkerCategory;
use stackd::worker::{handler_for, run_worker};
use stackd_test_utils::builders::{collect_until_terminal, StateBuilder};
use stackd_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

fn with_bom(text: &str) -> Vec<u8> {
    let mut bytes = BOM.to_vec();
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

fn site() -> Arc<MockFileSystem> {
    let fs = MockFileSystem::new();
    fs.add_file("/site/a.php", with_bom("<?php echo 1;"));
    fs.add_file("/site/b.php", "<?php echo 2;");
    fs.add_file("/site/lib/c.php", with_bom("<?php"));
    Arc::new(fs)
}

/// Start a worker over in-memory pipes and return the coordinator ends.
fn start_worker(
    category: WorkerCategory,
    fs: Arc<dyn FileSystem>,
) -> (FrameWriter<DuplexStream>, FrameReader<DuplexStream>) {
    let (coordinator_out, worker_in) = tokio::io::duplex(64 * 1024);
    let (worker_out, coordinator_in) = tokio::io::duplex(64 * 1024);
    tokio::spawn(run_worker(
        category,
        handler_for(category, fs),
        worker_in,
        worker_out,
    ));
    (FrameWriter::new(coordinator_out), FrameReader::new(coordinator_in))
}

async fn request(
    category: WorkerCategory,
    fs: Arc<dyn FileSystem>,
    args: Vec<Value>,
) -> StackdResult<Vec<WorkerMessage>> {
    let (mut writer, mut reader) = start_worker(category, fs);
    writer
        .send(&StateBuilder::new("/srv/stackd").build())
        .await?;
    writer
        .send(&Envelope::new(category.command(), "key-1", args).to_wire())
        .await?;

    let mut messages = Vec::new();
    while let Some(frame) = reader.next_value().await? {
        messages.push(WorkerMessage::from_value(frame)?);
    }
    Ok(messages)
}

fn status_of(message: &WorkerMessage) -> Option<&Status> {
    match message {
        WorkerMessage::Status { status, .. } => Some(status),
        _ => None,
    }
}

#[tokio::test]
async fn clean_bom_streams_progress_then_reports_each_file() -> TestResult {
    init_tracing();
    let fs = site();
    let messages = with_timeout(request(
        WorkerCategory::Tools,
        fs.clone(),
        vec![
            json!("cleanBom"),
            json!(["/site/a.php", "/site/b.php", "/site/lib/c.php", "/site/gone.php"]),
        ],
    ))
    .await?;

    let statuses: Vec<&Status> = messages.iter().filter_map(status_of).collect();
    assert_eq!(statuses.len(), 5);
    for (i, status) in statuses[..4].iter().enumerate() {
        match status {
            Status::Progress(p) => {
                assert_eq!(p["finished"], json!(i + 1));
                assert_eq!(p["count"], json!(4));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }
    let Status::Success(summary) = statuses[4] else {
        panic!("expected success, got {:?}", statuses[4]);
    };
    assert_eq!(summary["cleaned"], json!(2));
    let failed = summary["failed"].as_array().expect("failed list");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["file"], json!("/site/gone.php"));
    assert!(failed[0]["reason"].as_str().is_some_and(|r| !r.is_empty()));
    assert!(messages.iter().all(|m| m.key() == "key-1"));

    assert_eq!(fs.contents("/site/a.php").unwrap(), b"<?php echo 1;".to_vec());
    assert_eq!(fs.contents("/site/b.php").unwrap(), b"<?php echo 2;".to_vec());
    assert_eq!(fs.contents("/site/lib/c.php").unwrap(), b"<?php".to_vec());
    Ok(())
}

#[tokio::test]
async fn get_all_file_lists_relative_paths() -> TestResult {
    let messages = with_timeout(request(
        WorkerCategory::Tools,
        site(),
        vec![json!("getAllFile"), json!("/site"), json!(false)],
    ))
    .await?;

    assert_eq!(messages.len(), 1);
    assert_eq!(
        status_of(&messages[0]),
        Some(&Status::Success(json!(["a.php", "b.php", "lib/c.php"])))
    );
    Ok(())
}

#[tokio::test]
async fn unknown_function_fails_with_a_reason() -> TestResult {
    let messages = with_timeout(request(
        WorkerCategory::Tools,
        site(),
        vec![json!("formatDisk")],
    ))
    .await?;
    assert_eq!(
        status_of(&messages[0]),
        Some(&Status::Failure("unsupported command 'formatDisk' for worker 'tools'".into()))
    );

    let messages = with_timeout(request(WorkerCategory::Php, site(), vec![json!("startService")])).await?;
    assert_eq!(
        status_of(&messages[0]),
        Some(&Status::Failure("unsupported command 'startService' for worker 'php'".into()))
    );
    Ok(())
}

#[tokio::test]
async fn missing_function_name_fails() -> TestResult {
    let messages = with_timeout(request(WorkerCategory::Tools, site(), vec![json!(42)])).await?;
    assert!(matches!(status_of(&messages[0]), Some(Status::Failure(_))));
    Ok(())
}

/// Runs real worker code in-process instead of starting a binary.
struct InProcessBackend {
    fs: Arc<dyn FileSystem>,
}

struct InProcessWorker;

impl WorkerProcess for InProcessWorker {
    fn id(&self) -> Option<u32> {
        None
    }

    fn kill(&mut self) -> Pin<Box<dyn Future<Output = StackdResult<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

impl WorkerBackend for InProcessBackend {
    fn spawn(&self, category: WorkerCategory) -> StackdResult<WorkerLink> {
        let (coordinator_out, worker_in) = tokio::io::duplex(64 * 1024);
        let (worker_out, coordinator_in) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_worker(
            category,
            handler_for(category, Arc::clone(&self.fs)),
            worker_in,
            worker_out,
        ));
        Ok(WorkerLink {
            stdin: Box::new(coordinator_out),
            stdout: Box::new(coordinator_in),
            process: Box::new(InProcessWorker),
        })
    }
}

#[tokio::test]
async fn coordinator_and_worker_agree_end_to_end() -> TestResult {
    init_tracing();
    let fs = site();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        Arc::new(InProcessBackend { fs: fs.clone() }),
        SnapshotStore::new(StateBuilder::new("/srv/stackd").build()),
        ui_tx,
    );

    let deferred = coordinator.dispatch(
        Envelope::new(
            "app-fork:tools",
            "bom-1",
            vec![json!("cleanBom"), json!(["/site/a.php", "/site/lib/c.php"])],
        ),
        RequestOptions::default(),
    );
    let mut progress = deferred.progress();

    assert_eq!(
        with_timeout(deferred.wait()).await,
        Ok(json!({"cleaned": 2, "failed": []}))
    );
    assert_eq!(progress.recv().await.map(|p| p["count"].clone()), Some(json!(2)));

    let messages = with_timeout(collect_until_terminal(&mut ui_rx, "bom-1")).await;
    assert_eq!(messages.len(), 3);
    assert!(matches!(
        &messages[2].payload,
        UiPayload::Status(Status::Success(v)) if v["cleaned"] == json!(2)
    ));
    assert_eq!(fs.contents("/site/a.php").unwrap(), b"<?php echo 1;".to_vec());
    Ok(())
}
