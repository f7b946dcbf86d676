use std::sync::Arc;
use std::time::Duration;

use batch_runner::{
    BatchError, BatchOrchestrator, BatchRequest, Completion, ItemOutcome, PollerConfig,
    RunItem, RunOptions, SubmissionTotals,
};
use pretty_assertions::assert_eq;
use runs_api::{BatchStatus, CancelOutcome, CancellationToken, ErrorKind, Method, RepositoryRef};
use runs_api_mock::{ScriptedTransport, Step};
use serde_json::{json, Value};

const BULK_PATH: &str = "/runs/bulk";
const STATUS_PATH: &str = "/runs/bulk/batch-123";

fn request(prompts: &[&str]) -> BatchRequest {
    BatchRequest::new(
        RepositoryRef::Name("acme/widgets".to_owned()),
        prompts.iter().map(|prompt| RunItem::new(*prompt)).collect(),
    )
    .with_source_branch("main")
    .with_batch_title("cleanup")
}

fn orchestrator(transport: &Arc<ScriptedTransport>) -> BatchOrchestrator {
    BatchOrchestrator::with_poller_config(
        transport.client(),
        PollerConfig::default().with_interval(Duration::from_millis(100)),
    )
}

fn created(status: u16, successful: Value, failed: Value) -> Step {
    Step::json(
        status,
        json!({
            "data": {
                "batchId": "batch-123",
                "batchTitle": "cleanup",
                "successful": successful,
                "failed": failed,
            }
        }),
    )
}

fn accepted(index: usize) -> Value {
    json!({
        "id": format!("run-{index}"),
        "status": "queued",
        "repositoryName": "acme/widgets",
        "title": format!("task {index}"),
        "requestIndex": index,
    })
}

fn status(value: &str) -> Step {
    Step::json(200, json!({"batchId": "batch-123", "status": value, "runs": []}))
}

#[tokio::test(start_paused = true)]
async fn partial_submission_is_accounted_for_and_rejections_are_data() {
    let transport = ScriptedTransport::new();
    transport.push(
        Method::Post,
        BULK_PATH,
        created(
            207,
            json!([accepted(0)]),
            json!([
                {"requestIndex": 1, "prompt": "b", "error": "DUPLICATE_RUN",
                 "message": "identical run exists", "existingRunId": "run-old"},
                {"requestIndex": 2, "prompt": "c", "error": "INVALID_BRANCH",
                 "message": "branch 'dev' not found in acme/widgets"}
            ]),
        ),
    );

    let result = orchestrator(&transport)
        .submit(&request(&["a", "b", "c"]), &CancellationToken::new())
        .await
        .expect("submission");

    assert_eq!(
        result.totals(),
        SubmissionTotals {
            requested: 3,
            successful: 1,
            failed: 2,
            pending: 0
        }
    );
    assert_eq!(
        result.outcome(1),
        Some(&ItemOutcome::Rejected {
            code: "DUPLICATE_RUN".to_owned(),
            message: Some("identical run exists".to_owned()),
            existing_run_id: Some("run-old".to_owned()),
        })
    );
    assert_eq!(transport.calls(Method::Post, BULK_PATH), 1);

    let sent = &transport.requests()[0];
    let body = sent.body.as_ref().expect("request body");
    assert_eq!(body["runs"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["sourceBranch"], "main");
    assert_eq!(
        body["runs"][0]["fileHash"],
        RunItem::new("a").content_hash()
    );
}

#[tokio::test(start_paused = true)]
async fn run_polls_until_terminal_and_reports_both_views() {
    let transport = ScriptedTransport::new();
    transport.push(
        Method::Post,
        BULK_PATH,
        created(201, json!([accepted(0), accepted(1)]), json!([])),
    );
    transport.push_all(
        Method::Get,
        STATUS_PATH,
        [status("queued"), status("processing"), status("completed")],
    );

    let mut observed = Vec::new();
    let report = orchestrator(&transport)
        .run(
            &request(&["a", "b"]),
            &RunOptions::default(),
            &CancellationToken::new(),
            |snapshot| observed.push(snapshot.overall_status),
        )
        .await
        .expect("run");

    assert_eq!(report.completion, Completion::Finished);
    assert_eq!(report.snapshots_seen, 3);
    assert_eq!(
        observed,
        vec![
            BatchStatus::Queued,
            BatchStatus::Processing,
            BatchStatus::Completed
        ]
    );
    assert_eq!(
        report.final_snapshot.map(|snapshot| snapshot.overall_status),
        Some(BatchStatus::Completed)
    );
    assert_eq!(report.submission.totals().successful, 2);
}

#[tokio::test(start_paused = true)]
async fn all_rejected_submission_skips_polling() {
    let transport = ScriptedTransport::new();
    transport.push(
        Method::Post,
        BULK_PATH,
        created(
            200,
            json!([]),
            json!([{"requestIndex": 0, "error": "DUPLICATE_RUN", "message": "dup"}]),
        ),
    );

    let report = orchestrator(&transport)
        .run(
            &request(&["a"]),
            &RunOptions::default(),
            &CancellationToken::new(),
            |_| panic!("no snapshots expected"),
        )
        .await
        .expect("run");

    assert_eq!(report.completion, Completion::NotPolled);
    assert_eq!(transport.calls(Method::Get, STATUS_PATH), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_only_does_not_poll() {
    let transport = ScriptedTransport::new();
    transport.push(Method::Post, BULK_PATH, created(201, json!([accepted(0)]), json!([])));

    let report = orchestrator(&transport)
        .run(
            &request(&["a"]),
            &RunOptions::submit_only(),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .expect("run");

    assert_eq!(report.completion, Completion::NotPolled);
    assert_eq!(report.snapshots_seen, 0);
    assert_eq!(transport.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_never_reach_the_network() {
    let transport = ScriptedTransport::new();
    let orchestrator = orchestrator(&transport);
    let cancel = CancellationToken::new();

    let error = orchestrator
        .run(&request(&[]), &RunOptions::default(), &cancel, |_| {})
        .await
        .expect_err("empty batch");
    assert!(matches!(error, BatchError::EmptyBatch));

    let prompts: Vec<String> = (0..41).map(|index| format!("task {index}")).collect();
    let prompts: Vec<&str> = prompts.iter().map(String::as_str).collect();
    let error = orchestrator
        .submit(&request(&prompts), &cancel)
        .await
        .expect_err("oversized batch");
    assert!(error.is_validation());

    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn server_rejection_of_whole_batch_is_returned_without_result() {
    let transport = ScriptedTransport::new();
    transport.push(
        Method::Post,
        BULK_PATH,
        Step::json(401, json!({"message": "invalid API key"})),
    );

    let error = orchestrator(&transport)
        .submit(&request(&["a"]), &CancellationToken::new())
        .await
        .expect_err("auth failure");

    let api = error.api_error().expect("service error");
    assert_eq!(api.kind(), ErrorKind::Auth);
    assert!(api.hint().is_some());
}

#[tokio::test(start_paused = true)]
async fn polling_failure_keeps_the_batch_id_and_submission() {
    let transport = ScriptedTransport::new();
    transport.push(Method::Post, BULK_PATH, created(201, json!([accepted(0)]), json!([])));
    transport.push(
        Method::Get,
        STATUS_PATH,
        Step::json(404, json!({"message": "Batch batch-123 not found"})),
    );

    let error = orchestrator(&transport)
        .run(
            &request(&["a"]),
            &RunOptions::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .expect_err("lookup failure");

    let submission = error.submission().expect("submission outcomes");
    assert_eq!(submission.batch_id, "batch-123");
    assert_eq!(submission.totals().successful, 1);
    assert!(submission.outcomes()[0].is_accepted());

    match error {
        BatchError::Polling {
            batch_id, source, ..
        } => {
            assert_eq!(batch_id, "batch-123");
            assert_eq!(source.kind(), ErrorKind::NotFound);
        }
        other => panic!("expected polling failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn wait_ceiling_reports_timed_out_with_last_snapshot() {
    let transport = ScriptedTransport::new();
    transport.push(Method::Post, BULK_PATH, created(201, json!([accepted(0)]), json!([])));
    transport.repeat(Method::Get, STATUS_PATH, status("processing"));

    let options = RunOptions {
        poll: true,
        max_wait: Duration::from_millis(350),
    };
    let report = orchestrator(&transport)
        .run(&request(&["a"]), &options, &CancellationToken::new(), |_| {})
        .await
        .expect("run");

    assert_eq!(report.completion, Completion::TimedOut);
    assert_eq!(report.snapshots_seen, 4);
    assert_eq!(
        report.final_snapshot.map(|snapshot| snapshot.overall_status),
        Some(BatchStatus::Processing)
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_polling_reports_cancelled() {
    let transport = ScriptedTransport::new();
    transport.push(Method::Post, BULK_PATH, created(201, json!([accepted(0)]), json!([])));
    transport.repeat(Method::Get, STATUS_PATH, status("processing"));
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel.cancel();
        })
    };

    let report = orchestrator(&transport)
        .run(&request(&["a"]), &RunOptions::default(), &cancel, |_| {})
        .await
        .expect("run");
    canceller.await.expect("canceller task");

    assert_eq!(report.completion, Completion::Cancelled);
    assert!(report.snapshots_seen >= 1);
    assert_eq!(report.submission.batch_id, "batch-123");
}

#[tokio::test(start_paused = true)]
async fn cancel_batch_maps_conflict_to_already_terminal() {
    let transport = ScriptedTransport::new();
    transport.push_all(
        Method::Delete,
        STATUS_PATH,
        [
            Step::json(200, json!({"data": {"batchId": "batch-123", "status": "cancelled"}})),
            Step::json(409, json!({"message": "batch already completed"})),
        ],
    );
    let orchestrator = orchestrator(&transport);
    let cancel = CancellationToken::new();

    assert_eq!(
        orchestrator
            .cancel_batch("batch-123", &cancel)
            .await
            .expect("cancel"),
        CancelOutcome::Cancelled
    );
    assert_eq!(
        orchestrator
            .cancel_batch("batch-123", &cancel)
            .await
            .expect("cancel"),
        CancelOutcome::AlreadyTerminal
    );
}
