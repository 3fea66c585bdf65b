use mockito::{Matcher, Server};
use posture_jobs::config::Session;
use posture_jobs::error::JobError;
use posture_jobs::models::job::{JobKind, JobRequest, JobStatus, ScanScope};
use posture_jobs::models::result::ResultPayload;
use posture_jobs::services::client::{JobClient, JobService};
use serde_json::json;
use std::time::Duration;

fn client(url: &str) -> JobClient {
    JobClient::new(url, &Session::new("tok-123"), Duration::from_secs(5)).expect("client")
}

fn codes(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn single_target_remediation_posts_single_shape() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/fix/execute")
        .match_header("authorization", "Bearer tok-123")
        .match_body(Matcher::Json(json!({"server_id": "srv-01", "item_codes": ["U-01", "U-02"]})))
        .with_status(202)
        .with_header("content-type", "application/json")
        .with_body(json!({"job_id": "fix-1", "total_items": 2, "status": "queued", "message": "started"}).to_string())
        .create_async()
        .await;

    let request = JobRequest::new(JobKind::Remediation, codes(&["srv-01"]), codes(&["U-01", "U-02"])).unwrap();
    let handle = client(&server.url()).submit(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(handle.job_id, "fix-1");
    assert_eq!(handle.total_items, Some(2));
    assert_eq!(handle.status, JobStatus::Queued);
}

#[tokio::test]
async fn multi_target_remediation_posts_batch_shape() {
    let mut server = Server::new_async().await;
    let single = server.mock("POST", "/api/fix/execute").expect(0).create_async().await;
    let batch = server
        .mock("POST", "/api/fix/execute-batch")
        .match_body(Matcher::Json(json!({"server_ids": ["srv-01", "srv-02"], "item_codes": ["U-01"]})))
        .with_status(202)
        .with_body(json!({"job_id": "fix-2", "total_items": 2, "status": "queued", "message": "2 servers"}).to_string())
        .create_async()
        .await;

    let request = JobRequest::new(JobKind::Remediation, codes(&["srv-01", "srv-02"]), codes(&["U-01"])).unwrap();
    client(&server.url()).submit(&request).await.unwrap();

    batch.assert_async().await;
    single.assert_async().await;
}

#[tokio::test]
async fn scan_submit_carries_scope() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/scan/full")
        .match_body(Matcher::Json(json!({"server_ids": ["srv-01", "srv-02"], "scan_type": "scan-db", "item_codes": ["D-01"]})))
        .with_status(202)
        .with_body(json!({"job_id": "scan-1", "total_servers": 2, "status": "queued", "message": "ok"}).to_string())
        .create_async()
        .await;

    let request = JobRequest::new(JobKind::Scan(ScanScope::Db), codes(&["srv-01", "srv-02"]), codes(&["D-01"])).unwrap();
    let handle = client(&server.url()).submit(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(handle.total_targets, 2);
}

#[tokio::test]
async fn rejected_submit_surfaces_backend_detail() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/fix/execute")
        .with_status(400)
        .with_body(json!({"detail": "server srv-01 has no credentials"}).to_string())
        .create_async()
        .await;

    let request = JobRequest::new(JobKind::Remediation, codes(&["srv-01"]), codes(&["U-01"])).unwrap();
    let err = client(&server.url()).submit(&request).await.unwrap_err();

    match err {
        JobError::Transport { status, message } => {
            assert_eq!(status, Some(400));
            assert_eq!(message, "server srv-01 has no credentials");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn poll_parses_progress_and_maps_missing_job() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/scan/progress/scan-1")
        .with_status(200)
        .with_body(
            json!({
                "job_id": "scan-1", "status": "running", "progress": 40, "current_step": 2,
                "current_server": null, "completed_servers": 1, "total_servers": 3, "message": "checking"
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/api/fix/progress/gone")
        .with_status(404)
        .create_async()
        .await;

    let c = client(&server.url());
    let progress = c.poll(JobKind::Scan(ScanScope::All), "scan-1").await.unwrap();
    assert_eq!(progress.status, JobStatus::Running);
    assert_eq!(progress.percent(), 40);
    assert_eq!(progress.step(), 2);
    assert_eq!(progress.completed_targets, Some(1));

    let err = c.poll(JobKind::Remediation, "gone").await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(id) if id == "gone"));
}

#[tokio::test]
async fn early_result_fetch_is_not_ready() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/fix/result/fix-1")
        .with_status(404)
        .with_body(json!({"detail": "not completed"}).to_string())
        .create_async()
        .await;

    let err = client(&server.url())
        .fetch_result(JobKind::Remediation, "fix-1")
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotReady(_)));
}

#[tokio::test]
async fn result_payload_follows_job_kind() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/scan/result/scan-1")
        .with_status(200)
        .with_body(
            json!({
                "job_id": "scan-1", "company": "Acme", "total_servers": 3, "scan_duration": "2m",
                "vulnerable_count": 12, "secure_count": 80, "risk_percentage": 13,
                "top_vulnerable_server": {"server_id": "srv-02", "hostname": "legacy", "count": 7},
                "risk_distribution": {"low": 50, "medium": 30, "high": 20},
                "scan_completed_at": "2025-03-01T10:00:00"
            })
            .to_string(),
        )
        .create_async()
        .await;

    match client(&server.url()).fetch_result(JobKind::Scan(ScanScope::All), "scan-1").await.unwrap() {
        ResultPayload::Scan(report) => {
            assert_eq!(report.total_targets, 3);
            assert_eq!(report.top_vulnerable_target.unwrap().target_id, "srv-02");
            assert_eq!(report.risk_distribution.high, 20);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn affected_targets_lookup() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/fix/affected-servers")
        .match_body(Matcher::Json(json!({"item_codes": ["U-01", "U-04"]})))
        .with_status(200)
        .with_body(
            json!({
                "item_codes": ["U-01", "U-04"],
                "servers": [
                    {"server_id": "srv-01", "hostname": "web", "ip_address": "10.0.0.1", "os_type": "Ubuntu",
                     "vulnerable_items": ["U-01"], "vulnerable_count": 1},
                    {"server_id": "srv-02", "hostname": "api", "ip_address": "10.0.0.2", "os_type": "Rocky",
                     "vulnerable_items": ["U-01", "U-04"], "vulnerable_count": 2}
                ],
                "total_servers": 2,
                "total_fixable": 3
            })
            .to_string(),
        )
        .create_async()
        .await;

    let affected = client(&server.url())
        .affected_targets(&codes(&["U-01", "U-04"]))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(affected.targets.len(), 2);
    assert_eq!(affected.targets[1].address, "10.0.0.2");
    assert_eq!(affected.total_fixable, 3);
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    let c = JobClient::new("http://127.0.0.1:9", &Session::anonymous(), Duration::from_secs(2)).unwrap();
    let err = c.poll(JobKind::Remediation, "fix-1").await.unwrap_err();
    assert!(matches!(err, JobError::Transport { status: None, .. }));
}
