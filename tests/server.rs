mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{orchestrator, FakeBackend, FakeIngestor};
use git_sense::config::PushConfig;
use git_sense::server::{self, AppState};

/// Start the API on an ephemeral port, returning its base URL.
async fn start_server(cache: &std::path::Path, backend: FakeBackend) -> String {
    let orch = orchestrator(cache, Arc::new(FakeIngestor::new()), Arc::new(backend));
    let state = AppState::new(orch, PushConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        server::serve(listener, state).await.unwrap();
    });

    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/status", port);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_status_reports_version() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new()).await;

    let body: Value = reqwest::get(format!("{}/status", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_results_is_404() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new()).await;

    let resp = reqwest::get(format!("{}/results/nothing-here", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_analyze_then_poll_until_completed() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/analyze", base))
        .json(&json!({"repo_url": "https://example.com/org/demo.git"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"message": "Analysis started", "repo_id": "demo"}));

    let mut last = Value::Null;
    for _ in 0..100 {
        last = client
            .get(format!("{}/results/demo", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if last["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(last["status"], "completed");
    assert_eq!(last["bugs"][0]["file"], "app.py");
    assert_eq!(last["readme"], "# Demo\n\nA demo app.");
    assert_eq!(last["commits"].as_array().unwrap().len(), 2);
    assert!(last.get("error").is_none());
}

#[tokio::test]
async fn test_analyze_rejects_unusable_url() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new()).await;
    let client = reqwest::Client::new();

    for url in ["", "https://example.com/org/bad name"] {
        let resp = client
            .post(format!("{}/analyze", base))
            .json(&json!({ "repo_url": url }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "url {:?}", url);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_query_answers_for_indexed_repo() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new().indexed("demo")).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({"repo_id": "demo", "query": "where is auth handled?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["repo_id"], "demo");
    assert_eq!(body["answer"], "demo answers: where is auth handled?");
}

#[tokio::test]
async fn test_query_errors() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(
        tmp.path(),
        FakeBackend::new().indexed("demo").failing_ask(),
    )
    .await;
    let client = reqwest::Client::new();
    let query = |body: Value| {
        let client = client.clone();
        let url = format!("{}/query", base);
        async move { client.post(url).json(&body).send().await.unwrap() }
    };

    let resp = query(json!({"repo_id": "other", "query": "anything"})).await;
    assert_eq!(resp.status(), 404);

    let resp = query(json!({"repo_id": "demo", "query": "  "})).await;
    assert_eq!(resp.status(), 400);

    let resp = query(json!({"repo_id": "demo", "query": "anything"})).await;
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "llm_error");
}

#[tokio::test]
async fn test_push_rejects_escaping_path() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(tmp.path(), FakeBackend::new()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/push", base))
        .json(&json!({
            "repo_url": tmp.path().join("nowhere").to_str().unwrap(),
            "file_path": "../outside.txt",
            "content": "x",
            "commit_message": "try escaping",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("relative path inside the repository"));
}
