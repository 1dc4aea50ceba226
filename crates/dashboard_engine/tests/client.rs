mod common;

use std::time::Duration;

use dashboard_engine::{
    consume, CancellationToken, ClientSettings, FailureKind, JobClient, JobStatus, ReqwestClient,
    SearchClient, StartAck,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::init_logging;

fn client_for(server: &MockServer) -> ReqwestClient {
    ReqwestClient::new(ClientSettings {
        base_url: server.uri(),
        ..ClientSettings::default()
    })
    .unwrap()
}

#[tokio::test]
async fn status_payload_is_parsed_and_normalized() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/nightly/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "progress": 1.7,
            "message": "done"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client_for(&server)
        .status("nightly", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(snapshot.status, JobStatus::Success);
    assert_eq!(snapshot.progress, Some(1.0));
    assert_eq!(snapshot.message.as_deref(), Some("done"));
}

#[tokio::test]
async fn malformed_status_is_a_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/nightly/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .status("nightly", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Decode);
}

#[tokio::test]
async fn start_posts_params_and_accepts_an_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/nightly/start"))
        .and(body_json(json!({ "window": "1d" })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client_for(&server)
        .start("nightly", &json!({ "window": "1d" }), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ack, StartAck::default());
}

#[tokio::test]
async fn start_conflict_and_server_error_are_distinguished() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/busy/start"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "detail": "already running" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/broken/start"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let conflict = client.start("busy", &json!({}), &cancel).await.unwrap_err();
    assert_eq!(conflict.kind, FailureKind::Conflict);
    assert_eq!(conflict.message, "already running");

    let failure = client.start("broken", &json!({}), &cancel).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::HttpStatus(500));
    assert_eq!(failure.message, "database unavailable");
}

#[tokio::test]
async fn search_sends_the_query_and_accepts_both_response_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "apple inc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "symbol": "AAPL", "name": "Apple Inc.", "exchange": "NASDAQ" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "msft"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "symbol": "MSFT" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    let hits = client.search("apple inc", &cancel).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name.as_deref(), Some("Apple Inc."));

    let hits = client.search("msft", &cancel).await.unwrap();
    assert_eq!(hits[0].symbol, "MSFT");
    assert_eq!(hits[0].exchange, None);
}

#[tokio::test]
async fn generated_report_is_read_incrementally_or_whole() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/nightly/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Quarterly summary: stable."))
        .mount(&server)
        .await;
    let cancel = CancellationToken::new();

    let body = client_for(&server)
        .generate("nightly", &json!({ "prompt": "summarize" }), &cancel)
        .await
        .unwrap();
    let mut partials = Vec::new();
    let outcome = consume(body, |partial| partials.push(partial.to_string()), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.text, "Quarterly summary: stable.");
    assert_eq!(partials.last().map(String::as_str), Some("Quarterly summary: stable."));

    let whole = ReqwestClient::new(ClientSettings {
        base_url: server.uri(),
        incremental_reports: false,
        ..ClientSettings::default()
    })
    .unwrap();
    let body = whole.generate("nightly", &json!({}), &cancel).await.unwrap();
    let mut calls = 0;
    let outcome = consume(body, |_| calls += 1, &cancel).await.unwrap();
    assert_eq!(outcome.text, "Quarterly summary: stable.");
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn reset_and_result_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/nightly/reset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/jobs/locked/reset"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ok": false, "message": "job is locked" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/nightly/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": [1, 2, 3] })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();

    client.reset("nightly", &cancel).await.unwrap();
    let refused = client.reset("locked", &cancel).await.unwrap_err();
    assert_eq!(refused.message, "job is locked");

    let result = client.result("nightly", &cancel).await.unwrap();
    assert_eq!(result, json!({ "rows": [1, 2, 3] }));
}

#[tokio::test]
async fn cancellation_aborts_a_slow_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/nightly/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "running" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client.status("nightly", &cancel).await.unwrap_err();
    assert!(err.is_aborted());
}

#[tokio::test]
async fn unreachable_server_is_a_transport_failure() {
    let client = ReqwestClient::new(ClientSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        connect_timeout: Duration::from_millis(500),
        ..ClientSettings::default()
    })
    .unwrap();
    let err = client
        .status("nightly", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Transport);
}
