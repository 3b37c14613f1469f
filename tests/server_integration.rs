//! End-to-end tests for the HTTP server.
//!
//! Each test spawns the server on a free port with a scripted completion
//! client and an in-memory store, then drives it with `reqwest`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use mail_insight::completion::CompletionClient;
use mail_insight::config::Config;
use mail_insight::prompt::ChatMessage;
use mail_insight::server::{run_server_with_state, AppState};
use mail_insight::store::memory::InMemoryStore;

const KEY: &str = "test-key";

/// Completion fake: replies with a fixed string and records each request.
struct Scripted {
    reply: Result<String, String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Scripted {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing(msg: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(msg.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

const ORDERS: &str = r#"{
    "orders": [
        {"id": "o1", "fields": {"status": "open", "total": 12},
         "subcollections": {"items": [
            {"id": "a", "fields": {"kind": "book"}},
            {"id": "b", "fields": {"kind": "pen"}}
         ]}},
        {"id": "o2", "fields": {"status": "open"},
         "subcollections": {"items": [{"id": "c", "fields": {"kind": "pen"}}]}},
        {"id": "o3", "fields": {"status": "closed"}}
    ]
}"#;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Spawns a server and returns its base URL.
async fn spawn_server(completion: Arc<Scripted>, api_key: Option<&str>) -> String {
    let port = find_free_port();
    let mut cfg = Config::minimal();
    cfg.server.bind = format!("127.0.0.1:{}", port);
    cfg.server.max_upload_bytes = 64 * 1024;

    let store = Arc::new(InMemoryStore::from_fixture_str(ORDERS).unwrap());
    let state = AppState::new(cfg, completion, store, api_key.map(str::to_string));
    tokio::spawn(async move {
        run_server_with_state(state).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn post_process(base: &str, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/process", base))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

fn file(name: &str, bytes: &[u8]) -> Part {
    Part::bytes(bytes.to_vec()).file_name(name.to_string())
}

#[tokio::test]
async fn health_needs_no_key() {
    let base = spawn_server(Scripted::replying("{}"), Some(KEY)).await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "service": "File Processing Service"}));
}

#[tokio::test]
async fn index_lists_endpoints_and_formats() {
    let base = spawn_server(Scripted::replying("{}"), Some(KEY)).await;
    let body: Value = reqwest::get(format!("{}/", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let formats: Vec<&str> = body["supported_formats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f.as_str().unwrap())
        .collect();
    assert!(formats.contains(&".pdf"));
    assert!(formats.contains(&".png"));
    assert!(body["endpoints"]["POST /process"].is_string());
}

#[tokio::test]
async fn process_with_no_files() {
    let completion = Scripted::replying(r#"{"m1": {"Urgency": "Low"}, "calendar_add_details": []}"#);
    let base = spawn_server(completion.clone(), Some(KEY)).await;

    let resp = post_process(&base, Form::new().text("mail_id", "m1")).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["mail_id"], "m1");
    assert_eq!(body["total_attachments"], 0);
    assert_eq!(body["result"]["mail_id"], "m1");
    assert_eq!(body["result"]["status"], "success");
    assert_eq!(body["result"]["extracted_data"]["m1"]["Urgency"], "Low");
    assert!(body["result"].get("error").is_none());

    let messages = completion.last_request();
    assert_eq!(messages.len(), 3);
    assert!(messages[2].text().unwrap().contains("This email has no attachments."));
}

#[tokio::test]
async fn mail_id_defaults_when_absent() {
    let base = spawn_server(Scripted::replying("{}"), Some(KEY)).await;
    let resp = post_process(&base, Form::new()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["mail_id"], "mail_001");
    assert_eq!(body["total_attachments"], 0);
}

#[tokio::test]
async fn process_without_body_uses_defaults() {
    let completion = Scripted::replying("{}");
    let base = spawn_server(completion.clone(), Some(KEY)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/process", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["mail_id"], "mail_001");
    assert_eq!(body["result"]["mail_id"], "mail_001");
    assert_eq!(completion.calls(), 1);
}

#[tokio::test]
async fn upload_over_body_limit_is_413() {
    let completion = Scripted::replying("{}");
    let base = spawn_server(completion.clone(), Some(KEY)).await;

    let big = vec![b'a'; 100 * 1024];
    let form = Form::new()
        .text("mail_id", "m9")
        .part("files", file("big.txt", &big));
    let resp = post_process(&base, form).await;
    assert_eq!(resp.status(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["error"].is_string());
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn bad_files_are_dropped_and_images_sent_separately() {
    let completion = Scripted::replying("{}");
    let base = spawn_server(completion.clone(), Some(KEY)).await;

    let form = Form::new()
        .text("mail_id", "m2")
        .part("files", file("notes.txt", b"meet friday"))
        .part("files", file("virus.exe", b"MZ"))
        .part("files", file("binary.txt", &[0xff, 0xfe, 0x00]))
        .part("files", file("photo.JPG", &[0xff, 0xd8, 0xff]));
    let body: Value = post_process(&base, form).await.json().await.unwrap();
    assert_eq!(body["total_attachments"], 2);

    let messages = completion.last_request();
    assert_eq!(messages.len(), 4, "system, template, summary, one image");
    let summary = messages[2].text().unwrap();
    assert!(summary.contains("Attachment 1: notes.txt"));
    assert!(summary.contains("Content: meet friday"));
    assert!(summary.contains("Attachment 2: photo.JPG"));
    assert!(!summary.contains("virus.exe"));

    let image = serde_json::to_value(&messages[3]).unwrap();
    assert_eq!(image["content"][0]["text"], "Attachment: photo.JPG");
    let url = image["content"][1]["image_url"]["url"].as_str().unwrap();
    assert!(url.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn unparseable_reply_is_reported_in_result() {
    let base = spawn_server(Scripted::replying("not json"), Some(KEY)).await;
    let resp = post_process(&base, Form::new().text("mail_id", "m3")).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["status"], "error");
    assert_eq!(body["result"]["extracted_data"], json!({}));
    assert!(body["result"]["error"]
        .as_str()
        .unwrap()
        .starts_with("JSON parsing error"));
}

#[tokio::test]
async fn failed_call_is_reported_in_result() {
    let base = spawn_server(Scripted::failing("upstream timed out"), Some(KEY)).await;
    let body: Value = post_process(&base, Form::new().text("mail_id", "m4"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["status"], "error");
    assert!(body["result"]["error"]
        .as_str()
        .unwrap()
        .contains("upstream timed out"));
}

#[tokio::test]
async fn collections_need_the_key_process_does_not() {
    let base = spawn_server(Scripted::replying("{}"), Some(KEY)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/collections/orders/subcollections/items", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "error", "error": "Invalid API key"}));

    let resp = client
        .post(format!("{}/process", base))
        .multipart(Form::new().text("mail_id", "open"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/collections/orders/subcollections/items", base))
        .header("X-API-Key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn auth_disabled_lets_requests_through() {
    let base = spawn_server(Scripted::replying("{}"), None).await;
    let resp = reqwest::Client::new()
        .get(format!("{}/collections/orders/subcollections/items", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn collection_join_with_filters() {
    let base = spawn_server(Scripted::replying("{}"), Some(KEY)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/collections/orders/subcollections/items?collection_status=open&subcollection_kind=book",
            base
        ))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["data"],
        json!([{"id": "o1", "status": "open", "total": 12, "items": [{"id": "a", "kind": "book"}]}])
    );

    let body: Value = client
        .get(format!("{}/collections/orders/subcollections/items", base))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["o1", "o2", "o3"]);
    assert_eq!(body["data"][2]["items"], json!([]));
}
