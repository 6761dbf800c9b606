use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::gateway::{ReviewQuery, UpstreamError};
use crate::ledger::{LedgerError, Submission, VerificationRecord};
use crate::metrics::{self, MetricsSnapshot};

use super::ServiceState;
use super::http::{Request, Response};

/// Route one request to its handler.
pub(crate) fn handle(state: &ServiceState, request: &Request) -> Response {
    let path = match request.path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    match (path, request.method.as_str()) {
        ("/health", "GET") => Response::json(200, &json!({"status": "ok"})),
        ("/api/reviews/verify", "POST") => verify(state, request),
        ("/api/metrics", "GET") => metrics_view(state, request),
        ("/api/reviews/stats", "GET") => stats(state),
        ("/api/status", "GET") => status(state),
        ("/api/reviews", "GET") => reviews(state, request),
        ("/health" | "/api/metrics" | "/api/reviews/stats" | "/api/status" | "/api/reviews", _) => {
            method_not_allowed("GET")
        }
        ("/api/reviews/verify", _) => method_not_allowed("POST"),
        _ => Response::json(404, &json!({"error": "not found"})),
    }
}

fn method_not_allowed(allowed: &str) -> Response {
    Response::json(405, &json!({"error": "method not allowed"})).with_header("Allow", allowed)
}

fn verify(state: &ServiceState, request: &Request) -> Response {
    let result = Submission::from_json(&request.body).and_then(|submission| state.ledger.submit(submission));
    match result {
        Ok(record) => Response::json(200, &json!({"ok": true, "record": record})),
        Err(err) => ledger_error(err),
    }
}

fn ledger_error(err: LedgerError) -> Response {
    let retryable = err.is_retryable();
    match err {
        LedgerError::InvalidPayload(detail) => Response::json(
            400,
            &json!({"ok": false, "error": "invalid payload", "detail": detail}),
        ),
        LedgerError::StorageUnavailable(source) => {
            tracing::error!("Verification not stored: {source}");
            Response::json(
                500,
                &json!({
                    "ok": false,
                    "error": "storage unavailable",
                    "detail": source.to_string(),
                    "retryable": retryable
                }),
            )
        }
        LedgerError::Timeout(waited) => {
            tracing::warn!("Ledger did not answer within {waited:?}");
            Response::json(
                503,
                &json!({
                    "ok": false,
                    "error": "ledger timeout",
                    "detail": format!("no answer within {} ms", waited.as_millis()),
                    "retryable": retryable
                }),
            )
        }
    }
}

#[derive(Serialize)]
struct MetricsBody<'a> {
    metrics: &'a MetricsSnapshot,
    #[serde(with = "time::serde::rfc3339::option")]
    last_updated: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    generated_at: OffsetDateTime,
    data_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verifications_by_label: Option<BTreeMap<String, Vec<&'a VerificationRecord>>>,
}

fn metrics_view(state: &ServiceState, request: &Request) -> Response {
    let snapshot = state.ledger.read_all();
    let now = OffsetDateTime::now_utc();
    let computed = metrics::compute_metrics(&snapshot.records, now, &state.metrics);
    let include_records = matches!(request.query_param("include_records"), Some("true" | "1"));
    let body = MetricsBody {
        metrics: &computed,
        last_updated: computed.last_updated,
        generated_at: now,
        data_source: snapshot.data_source(),
        storage_error: snapshot.storage_error(),
        verifications_by_label: include_records
            .then(|| metrics::group_by_label(&snapshot.records)),
    };
    Response::json(200, &body)
}

fn stats(state: &ServiceState) -> Response {
    let snapshot = state.ledger.read_all();
    let computed =
        metrics::compute_metrics(&snapshot.records, OffsetDateTime::now_utc(), &state.metrics);
    let counts = computed.counts;
    let rates = computed.rates;
    Response::json(
        200,
        &json!({
            "meta": {
                "total": counts.total,
                "last_updated": computed.last_updated.map(rfc3339),
                "data_source": snapshot.data_source()
            },
            "counts": {
                "total": counts.total,
                "correct": counts.correct,
                "incorrect": counts.incorrect,
                "tp": counts.tp,
                "tn": counts.tn,
                "fp": counts.fp,
                "fn": counts.fn_
            },
            "metrics": {
                "accuracy": rates.accuracy,
                "precision": rates.precision,
                "recall": rates.recall,
                "f1": rates.f1
            }
        }),
    )
}

fn status(state: &ServiceState) -> Response {
    let timestamp = rfc3339(OffsetDateTime::now_utc());
    match state.ledger.status() {
        Ok(store) => {
            let health = if store.read_error.is_some() {
                "degraded"
            } else {
                "healthy"
            };
            Response::json(
                200,
                &json!({"status": health, "timestamp": timestamp, "persistence": store}),
            )
        }
        Err(err) => Response::json(
            503,
            &json!({
                "status": "unhealthy",
                "timestamp": timestamp,
                "error": err.to_string(),
                "retryable": err.is_retryable()
            }),
        ),
    }
}

fn reviews(state: &ServiceState, request: &Request) -> Response {
    let page = match request.query_param("page").map(|raw| raw.trim().parse::<u32>()) {
        None => None,
        Some(Ok(page)) => Some(page),
        Some(Err(err)) => {
            return Response::json(
                400,
                &json!({"error": "invalid page", "detail": err.to_string()}),
            );
        }
    };
    let query = ReviewQuery {
        page,
        label: request.query_param("label").map(str::to_string),
    };
    match state.gateway.fetch_feed(&query) {
        Ok(feed) => Response::json(200, feed.body()).with_header("X-Data-Source", feed.data_source()),
        Err(err) => upstream_error(&err),
    }
}

fn upstream_error(err: &UpstreamError) -> Response {
    tracing::warn!("Review fetch failed: {err}");
    let body = match err.status_code() {
        Some(code) => json!({"error": "Upstream error", "status": code, "retryable": true}),
        None => json!({"error": "Failed to fetch upstream", "retryable": true}),
    };
    Response::json(502, &body)
}

fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::config::{MetricsSettings, UpstreamSettings};
    use crate::gateway::ReviewGateway;
    use crate::http_client::tests::serve_once;
    use crate::ledger::{Ledger, MemoryBackend};
    use serde_json::Value;
    use std::net::TcpListener;
    use std::time::Duration;

    fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/reviews")
    }

    fn state_with(backend: &MemoryBackend, upstream: UpstreamSettings) -> ServiceState {
        ServiceState {
            ledger: Ledger::spawn(
                Box::new(backend.clone()),
                Classifier::new("INCIDENT"),
                Duration::from_secs(5),
            )
            .unwrap(),
            gateway: ReviewGateway::new(&upstream).unwrap(),
            metrics: MetricsSettings::default(),
        }
    }

    fn state() -> (ServiceState, MemoryBackend) {
        let backend = MemoryBackend::new();
        let upstream = UpstreamSettings {
            reviews_url: refused_url(),
            ..UpstreamSettings::default()
        };
        (state_with(&backend, upstream), backend)
    }

    fn request(method: &str, target: &str, body: &str) -> Request {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Request {
            method: method.to_string(),
            path: path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn call(state: &ServiceState, method: &str, target: &str, body: &str) -> (u16, Value) {
        let response = handle(state, &request(method, target, body));
        let value = serde_json::from_slice(&response.body).unwrap();
        (response.status, value)
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response
            .headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn verify_then_read_metrics() {
        let (state, _backend) = state();
        let (code, body) = call(
            &state,
            "POST",
            "/api/reviews/verify",
            r#"{"id":"r1","verdict":"correct","meta":{"label":"INCIDENT","confidence":0.9}}"#,
        );
        assert_eq!(code, 200);
        assert_eq!(body["ok"], true);
        assert_eq!(body["record"]["confusion"], "TP");

        let (code, body) = call(&state, "GET", "/api/metrics", "");
        assert_eq!(code, 200);
        assert_eq!(body["data_source"], "live");
        assert_eq!(body["metrics"]["counts"]["tp"], 1);
        assert_eq!(body["metrics"]["rates"]["f1"], 1.0);
        assert_eq!(body["last_updated"], body["metrics"]["last_updated"]);
        assert!(body.get("verifications_by_label").is_none());

        let (_, body) = call(&state, "GET", "/api/metrics?include_records=true", "");
        assert_eq!(body["verifications_by_label"]["INCIDENT"][0]["id"], "r1");
    }

    #[test]
    fn invalid_payload_is_a_client_error() {
        let (state, backend) = state();
        let (code, body) = call(&state, "POST", "/api/reviews/verify", r#"{"id":"r1","verdict":"maybe"}"#);
        assert_eq!(code, 400);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "invalid payload");
        assert!(backend.records().is_empty());
    }

    #[test]
    fn storage_failure_is_a_server_error() {
        let (state, backend) = state();
        backend.fail_writes(true);
        let (code, body) = call(&state, "POST", "/api/reviews/verify", r#"{"id":"r1","verdict":"correct"}"#);
        assert_eq!(code, 500);
        assert_eq!(body["retryable"], false);
    }

    #[test]
    fn ledger_timeout_is_retryable() {
        let backend = MemoryBackend::new();
        backend.set_write_delay(Duration::from_millis(300));
        let mut state = state_with(
            &backend,
            UpstreamSettings {
                reviews_url: refused_url(),
                ..UpstreamSettings::default()
            },
        );
        state.ledger = Ledger::spawn(
            Box::new(backend.clone()),
            Classifier::new("INCIDENT"),
            Duration::from_millis(50),
        )
        .unwrap();
        let (code, body) = call(&state, "POST", "/api/reviews/verify", r#"{"id":"r1","verdict":"correct"}"#);
        assert_eq!(code, 503);
        assert_eq!(body["retryable"], true);
    }

    #[test]
    fn unreadable_store_marks_metrics_degraded() {
        let (state, backend) = state();
        backend.fail_reads(true);
        let (code, body) = call(&state, "GET", "/api/metrics", "");
        assert_eq!(code, 200);
        assert_eq!(body["data_source"], "degraded");
        assert!(body["storage_error"].as_str().unwrap().contains("injected"));
        assert_eq!(body["metrics"]["counts"]["total"], 0);

        let (code, body) = call(&state, "GET", "/api/status", "");
        assert_eq!(code, 200);
        assert_eq!(body["status"], "degraded");
    }

    #[test]
    fn stats_keeps_the_compact_shape() {
        let (state, _backend) = state();
        for body in [
            r#"{"id":"r1","verdict":"correct","meta":{"label":"INCIDENT"}}"#,
            r#"{"id":"r2","verdict":"incorrect","meta":{"label":"NOT"}}"#,
            r#"{"id":"r3","verdict":"correct","timestamp":"2025-08-10T12:00:00Z"}"#,
        ] {
            assert_eq!(call(&state, "POST", "/api/reviews/verify", body).0, 200);
        }
        let (code, body) = call(&state, "GET", "/api/reviews/stats", "");
        assert_eq!(code, 200);
        assert_eq!(body["meta"]["total"], 3);
        assert_eq!(body["counts"]["tp"], 1);
        assert_eq!(body["counts"]["fn"], 1);
        assert_eq!(body["counts"]["correct"], 2);
        assert_eq!(body["metrics"]["precision"], 1.0);
        assert_eq!(body["metrics"]["recall"], 0.5);
        assert!(body["meta"]["last_updated"].is_string());
    }

    #[test]
    fn status_reports_backend_and_count() {
        let (state, _backend) = state();
        call(&state, "POST", "/api/reviews/verify", r#"{"id":"r1","verdict":"correct"}"#);
        let (code, body) = call(&state, "GET", "/api/status", "");
        assert_eq!(code, 200);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["persistence"]["backend"], "memory");
        assert_eq!(body["persistence"]["record_count"], 1);
    }

    #[test]
    fn unknown_paths_and_methods() {
        let (state, _backend) = state();
        assert_eq!(call(&state, "GET", "/nope", "").0, 404);
        let response = handle(&state, &request("GET", "/api/reviews/verify", ""));
        assert_eq!(response.status, 405);
        assert_eq!(header(&response, "Allow"), Some("POST"));
        assert_eq!(call(&state, "DELETE", "/api/metrics", "").0, 405);
        assert_eq!(call(&state, "GET", "/health/", "").0, 200);
    }

    #[test]
    fn reviews_relay_upstream_body() {
        let body = r#"{"data":[{"id":"a"}],"meta":{"total":1}}"#;
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        let state = state_with(
            &MemoryBackend::new(),
            UpstreamSettings {
                reviews_url: url,
                ..UpstreamSettings::default()
            },
        );
        let response = handle(&state, &request("GET", "/api/reviews?page=1", ""));
        assert_eq!(response.status, 200);
        assert_eq!(header(&response, "X-Data-Source"), Some("live"));
        let value: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value, serde_json::from_str::<Value>(body).unwrap());
    }

    #[test]
    fn upstream_status_maps_to_bad_gateway() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        );
        let state = state_with(
            &MemoryBackend::new(),
            UpstreamSettings {
                reviews_url: url,
                ..UpstreamSettings::default()
            },
        );
        let (code, body) = call(&state, "GET", "/api/reviews", "");
        assert_eq!(code, 502);
        assert_eq!(body["error"], "Upstream error");
        assert_eq!(body["status"], 500);
        assert_eq!(body["retryable"], true);
    }

    #[test]
    fn unreachable_upstream_maps_to_bad_gateway() {
        let (state, _backend) = state();
        let (code, body) = call(&state, "GET", "/api/reviews?label=INCIDENT", "");
        assert_eq!(code, 502);
        assert_eq!(body["error"], "Failed to fetch upstream");
    }

    #[test]
    fn demo_fallback_is_flagged() {
        let state = state_with(
            &MemoryBackend::new(),
            UpstreamSettings {
                reviews_url: refused_url(),
                demo_fallback: true,
                ..UpstreamSettings::default()
            },
        );
        let response = handle(&state, &request("GET", "/api/reviews", ""));
        assert_eq!(response.status, 200);
        assert_eq!(header(&response, "X-Data-Source"), Some("sample"));
        let value: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["data_source"], "sample");
        assert!(value["notice"].is_string());
    }

    #[test]
    fn non_numeric_page_is_rejected() {
        let (state, _backend) = state();
        let (code, body) = call(&state, "GET", "/api/reviews?page=two", "");
        assert_eq!(code, 400);
        assert_eq!(body["error"], "invalid page");
    }
}
