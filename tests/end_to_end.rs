use mock_http_api::{
    Failure, MockRequest, MockServer, MockServerConfig, RecordingReporter, ReleaseGate, Reply,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Headers reqwest adds on its own.
const CLIENT_HEADERS: [&str; 3] = ["accept", "content-length", "content-type"];

async fn start() -> (MockServer, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let server = MockServer::builder()
        .filtered_headers(CLIENT_HEADERS)
        .reporter(reporter.clone())
        .start()
        .await
        .expect("start mock server");
    (server, reporter)
}

async fn get(server: &MockServer, path: &str) -> reqwest::Response {
    reqwest::get(server.url(path)).await.expect("send request")
}

#[tokio::test]
async fn widgets_once_then_exhausted() {
    let (server, reporter) = start().await;
    server
        .with_json_reply(MockRequest::new("GET", "/widgets"), 200, json!({"count": 3}))
        .once();

    let response = get(&server, "/widgets").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"count": 3}));

    assert!(server.verify().is_empty());

    let response = get(&server, "/widgets").await;
    assert_eq!(response.status(), 404);

    server.close();
    let failures = reporter.take();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        Failure::UnmatchedRequest {
            fingerprint,
            exhausted,
        } => {
            assert_eq!(fingerprint.path, "/widgets");
            assert_eq!(*exhausted, 1);
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[tokio::test]
async fn default_cardinality_requires_one_call() {
    let (server, reporter) = start().await;
    server.with_no_response_body(MockRequest::new("GET", "/ping"), 204);

    server.close();
    let failures = reporter.take();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        Failure::UnmetExpectation { actual: 0, .. }
    ));
}

#[tokio::test]
async fn maybe_never_fails() {
    let (server, reporter) = start().await;
    server
        .with_no_response_body(MockRequest::new("GET", "/none"), 200)
        .maybe();
    let many = server
        .with_no_response_body(MockRequest::new("GET", "/many"), 200)
        .maybe();

    for _ in 0..5 {
        assert_eq!(get(&server, "/many").await.status(), 200);
    }
    assert_eq!(many.calls(), 5);

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn duplicate_expectations_are_consumed_in_order() {
    let (server, reporter) = start().await;
    let first = server
        .with_txt_reply(MockRequest::new("GET", "/token"), 200, "first")
        .times(1);
    let second = server
        .with_txt_reply(MockRequest::new("GET", "/token"), 200, "second")
        .times(1);

    assert_eq!(get(&server, "/token").await.text().await.unwrap(), "first");
    assert_eq!(get(&server, "/token").await.text().await.unwrap(), "second");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn unmatched_request_without_default_handler() {
    let (server, reporter) = start().await;

    let response = get(&server, "/missing").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unmatched_request");

    server.close();
    let failures = reporter.take();
    assert!(matches!(
        &failures[..],
        [Failure::UnmatchedRequest { exhausted: 0, .. }]
    ));
}

#[tokio::test]
async fn default_handler_absorbs_unexpected_traffic() {
    let (server, reporter) = start().await;
    server.with_no_response_body(MockRequest::new("GET", "/known"), 200);
    let fallback = server.default_handler(Reply::text(418, "fallback"));

    assert_eq!(get(&server, "/known").await.status(), 200);
    let response = get(&server, "/unknown").await;
    assert_eq!(response.status(), 418);
    assert_eq!(response.text().await.unwrap(), "fallback");
    // Budget of /known is spent, so the repeat goes to the default handler
    assert_eq!(get(&server, "/known").await.status(), 418);
    assert_eq!(fallback.calls(), 2);

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn json_body_is_matched_structurally() {
    let (server, reporter) = start().await;
    server.with_no_response_body(
        MockRequest::new("POST", "/items").with_json(json!({"a": 1, "b": [true]})),
        201,
    );

    let response = reqwest::Client::new()
        .post(server.url("/items"))
        .body(r#"{ "b": [true], "a": 1 }"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn raw_body_and_missing_body() {
    let (server, reporter) = start().await;
    server.with_no_response_body(MockRequest::new("PUT", "/blob").with_body("not-json"), 204);
    server.with_no_response_body(MockRequest::new("PUT", "/empty"), 204);

    let client = reqwest::Client::new();
    let response = client
        .put(server.url("/blob"))
        .body("not-json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    // A body where none is expected does not match
    let response = client
        .put(server.url("/empty"))
        .body("surprise")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client.put(server.url("/empty")).send().await.unwrap();
    assert_eq!(response.status(), 204);

    server.close();
    assert_eq!(reporter.take().len(), 1);
}

#[tokio::test]
async fn filtered_headers_are_ignored() {
    let (server, reporter) = start().await;
    server.set_filtered_headers(CLIENT_HEADERS.iter().copied().chain(["x-request-id"]));
    server.with_no_response_body(MockRequest::new("GET", "/traced"), 200);

    let response = reqwest::Client::new()
        .get(server.url("/traced"))
        .header("X-Request-Id", "4f1c")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn headers_and_query_must_match() {
    let (server, reporter) = start().await;
    server.with_no_response_body(
        MockRequest::new("GET", "/secure")
            .with_headers([("X-Api-Key", "k1")])
            .with_query_params([("page", "2")]),
        200,
    );

    let client = reqwest::Client::new();
    let response = client
        .get(server.url("/secure?page=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .get(server.url("/secure?page=2"))
        .header("x-api-key", "k1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.close();
    assert_eq!(reporter.take().len(), 1);
}

#[tokio::test]
async fn multi_value_query_is_reported_but_served() {
    let (server, reporter) = start().await;
    server.with_no_response_body(
        MockRequest::new("GET", "/search").with_query_params([("tag", "a")]),
        200,
    );

    let response = get(&server, "/search?tag=a&tag=b").await;
    assert_eq!(response.status(), 200);

    server.close();
    let failures = reporter.take();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        Failure::MultiValueFieldDetected { name, .. } if name == "tag"
    ));
}

#[tokio::test]
async fn release_gate_holds_response() {
    let (server, reporter) = start().await;
    let gate = ReleaseGate::new();
    let handle = server
        .with_txt_reply(MockRequest::new("GET", "/slow"), 200, "done")
        .release_gate(gate.clone());

    let url = server.url("/slow");
    let pending = tokio::spawn(async move {
        reqwest::get(url).await.unwrap().text().await.unwrap()
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request reached the server");

    // Matched and counted, but still held
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    gate.release();
    assert_eq!(pending.await.unwrap(), "done");

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn streaming_reply() {
    let (server, reporter) = start().await;
    server.with_streaming_reply(
        MockRequest::new("GET", "/download"),
        200,
        Cursor::new(b"line one\nline two\n".to_vec()),
    );

    let body = get(&server, "/download").await.bytes().await.unwrap();
    assert_eq!(&body[..], b"line one\nline two\n");

    server.close();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn encoding_failure_is_reported() {
    struct Broken;

    impl serde::Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    let (server, reporter) = start().await;
    server.with_json_reply(MockRequest::new("GET", "/broken"), 200, Broken);

    assert_eq!(get(&server, "/broken").await.status(), 500);

    server.close();
    let failures = reporter.take();
    assert!(matches!(
        &failures[..],
        [Failure::ResponseEncodingFailed { format: "json", .. }]
    ));
}

#[tokio::test]
async fn received_requests_are_recorded() {
    let (server, _reporter) = start().await;
    server.default_handler(Reply::empty(200));

    get(&server, "/one?x=1").await;
    get(&server, "/two").await;

    let received = server.received_requests();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].path, "/one");
    assert_eq!(
        received[0].query_params.as_ref().and_then(|q| q.get("x")).map(String::as_str),
        Some("1")
    );
    assert_eq!(received[1].method, "GET");
    server.close();
}

#[tokio::test]
async fn request_recording_can_be_turned_off() {
    let server = MockServer::builder()
        .filtered_headers(CLIENT_HEADERS)
        .record_requests(false)
        .start()
        .await
        .unwrap();
    server.default_handler(Reply::empty(200));

    assert_eq!(get(&server, "/one").await.status(), 200);
    assert!(server.received_requests().is_empty());
    server.close();
}

#[tokio::test]
#[should_panic(expected = "unmatched request GET /nowhere")]
async fn failures_panic_without_reporter() {
    let server = MockServer::builder()
        .filtered_headers(CLIENT_HEADERS)
        .start()
        .await
        .unwrap();

    assert_eq!(get(&server, "/nowhere").await.status(), 404);
    server.close();
}

#[tokio::test]
#[should_panic(expected = "unmet expectation")]
async fn drop_verifies_expectations() {
    let server = MockServer::start().await.unwrap();
    server.with_no_response_body(MockRequest::new("GET", "/required"), 200);
}

#[tokio::test]
async fn config_file_round_trip() {
    let yaml = r#"
settings:
  filtered_headers: [accept, content-length, content-type]
expectations:
  - request: {method: GET, path: /widgets}
    response:
      status: 200
      body: {type: json, content: {count: 3}}
  - request:
      method: POST
      path: /widgets
      body: {type: json, content: {name: sprocket}}
    response: {status: 201}
    times: 2
default_response:
  status: 404
"#;
    let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
    let (server, reporter) = start().await;
    config.apply(&server).unwrap();

    let client = reqwest::Client::new();
    let body: Value = client
        .get(server.url("/widgets"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 3);

    for _ in 0..2 {
        let response = client
            .post(server.url("/widgets"))
            .json(&json!({"name": "sprocket"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    // Anything else falls through to the default response
    assert_eq!(get(&server, "/other").await.status(), 404);

    server.close();
    assert!(reporter.is_empty());
}
