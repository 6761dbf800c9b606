use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reviewdash::classifier::Classifier;
use reviewdash::config::{MetricsSettings, ServerSettings, UpstreamSettings};
use reviewdash::gateway::ReviewGateway;
use reviewdash::ledger::{JsonFileBackend, Ledger};
use reviewdash::server::{Server, ServiceState};
use serde_json::{Value, json};

const RESULTS_FILE: &str = "verification_results.json";
const BACKUP_FILE: &str = "verification_results_backup.json";
const LOG_FILE: &str = "verification_log.txt";

fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/reviews")
}

fn start_server(data_dir: &Path) -> String {
    let backend = JsonFileBackend::new(data_dir, RESULTS_FILE)
        .with_backup(BACKUP_FILE)
        .with_audit_log(LOG_FILE);
    let ledger = Ledger::spawn(
        Box::new(backend),
        Classifier::new("INCIDENT"),
        Duration::from_secs(5),
    )
    .unwrap();
    let upstream = UpstreamSettings {
        reviews_url: refused_url(),
        timeout_ms: 2_000,
        ..UpstreamSettings::default()
    };
    let state = ServiceState {
        ledger,
        gateway: ReviewGateway::new(&upstream).unwrap(),
        metrics: MetricsSettings::default(),
    };
    let settings = ServerSettings {
        bind_addr: "127.0.0.1:0".to_string(),
        max_body_bytes: 4096,
        ..ServerSettings::default()
    };
    let server = Server::bind(&settings, state).unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn().unwrap();
    format!("http://{addr}")
}

fn finish(result: Result<ureq::Response, ureq::Error>) -> (u16, Option<String>, Value) {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("request failed: {err}"),
    };
    let status = response.status();
    let cache = response.header("Cache-Control").map(str::to_string);
    let body: Value = response.into_json().unwrap();
    (status, cache, body)
}

fn get(base: &str, path: &str) -> (u16, Value) {
    let (status, cache, body) = finish(ureq::get(&format!("{base}{path}")).call());
    assert_eq!(cache.as_deref(), Some("no-store"), "{path}");
    (status, body)
}

fn post(base: &str, path: &str, body: &Value) -> (u16, Value) {
    let (status, cache, body) = finish(ureq::post(&format!("{base}{path}")).send_json(body));
    assert_eq!(cache.as_deref(), Some("no-store"), "{path}");
    (status, body)
}

fn raw_exchange(base: &str, request: &str) -> String {
    let addr = base.trim_start_matches("http://");
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    response
}

#[test]
fn verification_flow_updates_metrics_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path());

    let (status, body) = get(&base, "/api/metrics");
    assert_eq!(status, 200);
    assert_eq!(body["metrics"]["counts"]["total"], 0);
    assert_eq!(body["metrics"]["rates"]["accuracy"], 0.0);
    assert_eq!(body["metrics"]["rates"]["f1"], 0.0);
    assert!(body["last_updated"].is_null());

    let (status, body) = post(
        &base,
        "/api/reviews/verify",
        &json!({"id": "r1", "verdict": "correct", "meta": {"label": "INCIDENT"}}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["record"]["confusion"], "TP");

    let (_, body) = post(
        &base,
        "/api/reviews/verify",
        &json!({"id": "r2", "verdict": "incorrect", "meta": {"label": "NOT"}}),
    );
    assert_eq!(body["record"]["confusion"], "FN");
    let (_, body) = get(&base, "/api/metrics");
    assert_eq!(body["metrics"]["rates"]["precision"], 1.0);
    assert_eq!(body["metrics"]["rates"]["recall"], 0.5);
    assert_eq!(body["metrics"]["rates"]["accuracy"], 0.5);

    let (_, body) = post(
        &base,
        "/api/reviews/verify",
        &json!({"id": "r1", "verdict": "incorrect", "meta": {"label": "INCIDENT"}}),
    );
    assert_eq!(body["record"]["confusion"], "FP");
    let (_, body) = get(&base, "/api/metrics");
    assert_eq!(body["metrics"]["counts"]["tp"], 0);
    assert_eq!(body["metrics"]["counts"]["fp"], 1);
    assert_eq!(body["metrics"]["counts"]["total"], 2);

    let (_, body) = post(
        &base,
        "/api/reviews/verify",
        &json!({"id": "r3", "verdict": "correct"}),
    );
    assert!(body["record"]["confusion"].is_null());
    let (_, body) = get(&base, "/api/reviews/stats");
    assert_eq!(body["counts"]["total"], 3);
    assert_eq!(body["counts"]["correct"], 1);
    assert_eq!(body["counts"]["incorrect"], 2);
    assert_eq!(
        body["counts"]["tp"].as_u64().unwrap()
            + body["counts"]["tn"].as_u64().unwrap()
            + body["counts"]["fp"].as_u64().unwrap()
            + body["counts"]["fn"].as_u64().unwrap(),
        2
    );

    let stored: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(RESULTS_FILE)).unwrap())
            .unwrap();
    assert_eq!(stored["schema_version"], 1);
    assert_eq!(stored["records"].as_array().unwrap().len(), 3);
    assert!(dir.path().join(BACKUP_FILE).exists());
    let log = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 4);

    let (status, body) = get(&base, "/api/status");
    assert_eq!(status, 200);
    assert_eq!(body["persistence"]["backend"], "json");
    assert_eq!(body["persistence"]["record_count"], 3);
    assert_eq!(body["persistence"]["results_file"]["exists"], true);
}

#[test]
fn records_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first = start_server(dir.path());
    post(
        &first,
        "/api/reviews/verify",
        &json!({"id": "r1", "verdict": "correct", "meta": {"label": "INCIDENT", "confidence": 0.95}}),
    );

    let second = start_server(dir.path());
    let (_, body) = get(&second, "/api/metrics?include_records=true");
    assert_eq!(body["metrics"]["counts"]["tp"], 1);
    assert_eq!(body["metrics"]["confidence"]["high"]["count"], 1);
    assert_eq!(body["verifications_by_label"]["INCIDENT"][0]["id"], "r1");
}

#[test]
fn concurrent_submissions_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path());
    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let base = base.clone();
            thread::spawn(move || {
                for n in 0..10 {
                    let (status, _) = post(
                        &base,
                        "/api/reviews/verify",
                        &json!({"id": format!("w{worker}-{n}"), "verdict": "correct", "meta": {"label": "NOT"}}),
                    );
                    assert_eq!(status, 200);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let (_, body) = get(&base, "/api/reviews/stats");
    assert_eq!(body["counts"]["total"], 60);
    assert_eq!(body["counts"]["tn"], 60);
}

#[test]
fn invalid_submissions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path());
    for payload in [
        json!({"verdict": "correct"}),
        json!({"id": "r1", "verdict": "probably"}),
        json!({"id": "r1", "verdict": "correct", "meta": {"confidence": 3.0}}),
    ] {
        let (status, body) = post(&base, "/api/reviews/verify", &payload);
        assert_eq!(status, 400, "{payload}");
        assert_eq!(body["error"], "invalid payload");
    }
    let (_, body) = get(&base, "/api/metrics");
    assert_eq!(body["metrics"]["counts"]["total"], 0);
}

#[test]
fn transport_level_errors() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path());

    let response = raw_exchange(
        &base,
        "POST /api/reviews/verify HTTP/1.1\r\nHost: x\r\nContent-Length: 100000\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");
    assert!(response.contains("Cache-Control: no-store"));

    let response = raw_exchange(&base, "NONSENSE\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    let (status, _) = get(&base, "/api/unknown");
    assert_eq!(status, 404);
    let (status, _) = get(&base, "/api/reviews/verify");
    assert_eq!(status, 405);
    let (status, body) = get(&base, "/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[test]
fn unreachable_upstream_is_a_gateway_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = start_server(dir.path());
    let (status, body) = get(&base, "/api/reviews?page=1&label=INCIDENT");
    assert_eq!(status, 502);
    assert_eq!(body["error"], "Failed to fetch upstream");
    assert_eq!(body["retryable"], true);
}
