//! HttpTransport against a local mock server

use extract_runner::cli::config::TransportSettings;
use extract_runner::transport::{HttpRequest, HttpTransport, Transport, TransportError};
use serde_json::json;
use std::collections::HashMap;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn transport() -> HttpTransport {
    HttpTransport::new(&TransportSettings {
        user_agent: "extract-runner-tests".to_string(),
        timeout_secs: 5,
        concurrency: 4,
    })
    .unwrap()
}

#[tokio::test]
async fn get_sends_task_headers_and_flattens_response_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("x-token", "abc"))
        .and(header("user-agent", "extract-runner-tests"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>page</html>")
                .insert_header("x-served-by", "mock"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = HashMap::new();
    headers.insert("X-Token".to_string(), "abc".to_string());

    let response = transport()
        .get(&format!("{}/page", server.uri()), &headers)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<html>page</html>");
    assert_eq!(response.headers.get("x-served-by").map(String::as_str), Some("mock"));
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/gone", server.uri());
    match transport().get(&url, &HashMap::new()).await {
        Err(TransportError::Status { status, url: failed_url }) => {
            assert_eq!(status, 503);
            assert_eq!(failed_url, url);
        },
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn post_json_sends_body_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"query": "rust", "page": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .post_json(
            &format!("{}/api", server.uri()),
            r#"{"query":"rust","page":2}"#,
            &HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(serde_json::from_slice::<serde_json::Value>(&response.body).unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn batch_results_keep_input_order() {
    let server = MockServer::start().await;
    for i in 0..6 {
        let status = if i == 3 { 500 } else { 200 };
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", i)))
            .respond_with(ResponseTemplate::new(status).set_body_string(format!("item {}", i)))
            .mount(&server)
            .await;
    }

    let requests = (0..6)
        .map(|i| HttpRequest::Get {
            url: format!("{}/item/{}", server.uri(), i),
            headers: HashMap::new(),
        })
        .collect();

    let responses = transport().execute_batch(requests, 2).await;

    assert_eq!(responses.len(), 6);
    for (i, response) in responses.iter().enumerate() {
        if i == 3 {
            assert!(matches!(response, Err(TransportError::Status { status: 500, .. })));
        } else {
            assert_eq!(response.as_ref().unwrap().text(), format!("item {}", i));
        }
    }
}
