use multichat::config::Config;
use multichat::server::{self, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// 启动服务器，返回监听地址
async fn spawn_server(models_file: &Path) -> SocketAddr {
    let config = Config {
        models_file: models_file.to_path_buf(),
        request_timeout_secs: 5,
        ..Config::default()
    };
    let state = Arc::new(AppState::from_config(&config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state, std::future::pending()));
    addr
}

fn write_models(path: &Path, models: Value) {
    std::fs::write(path, serde_json::to_string_pretty(&models).unwrap()).unwrap();
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// 一个模型正常回复、一个上游报错、一个未启用：只对比启用的两个，失败的标记 error
#[tokio::test]
async fn test_chat_fans_out_and_isolates_failures() {
    let mut healthy = mockito::Server::new_async().await;
    let mut broken = mockito::Server::new_async().await;

    let healthy_mock = healthy
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-healthy")
        .match_body(mockito::Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "user", "content": "之前的问题"},
                {"role": "assistant", "content": "之前的回答"},
                {"role": "user", "content": "你好"}
            ]
        })))
        .with_status(200)
        .with_body(r#"{"choices": [{"index": 0, "message": {"role": "assistant", "content": "你好！"}}]}"#)
        .create_async()
        .await;

    let broken_mock = broken
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body(r#"{"error": {"message": "upstream exploded"}}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let models_file = dir.path().join("models.json");
    write_models(
        &models_file,
        json!([
            {"id": "model-broken", "name": "Broken", "api_type": "openai", "base_url": broken.url(),
             "api_key": "sk-broken", "model": "gpt-4o", "active": true},
            {"id": "model-off", "name": "Off", "api_type": "openai", "base_url": "http://127.0.0.1:9",
             "api_key": "sk-off", "model": "gpt-4o", "active": false},
            {"id": "model-healthy", "name": "Healthy", "api_type": "openai", "base_url": healthy.url(),
             "api_key": "sk-healthy", "model": "gpt-4o-mini", "active": true}
        ]),
    );

    let addr = spawn_server(&models_file).await;
    let response = client()
        .post(format!("http://{}/api/chat", addr))
        .json(&json!({
            "message": "你好",
            "conversationId": 1,
            "messageHistory": [
                {"id": 101, "content": "之前的问题", "timestamp": "2025-04-20T11:40:17", "sender": "user"},
                {"id": 102, "content": "之前的回答", "timestamp": "2025-04-20T11:40:20",
                 "responseTime": 3000, "sender": "ai", "modelId": "model-healthy", "modelName": "Healthy"}
            ],
            "clientToken": "pending-1"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["userMessage"]["content"], "你好");
    assert_eq!(body["userMessage"]["sender"], "user");
    assert_eq!(body["clientToken"], "pending-1");

    let responses = body["modelResponses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);

    // 顺序与注册表一致
    assert_eq!(responses[0]["modelId"], "model-broken");
    assert_eq!(responses[0]["error"], true);
    assert!(responses[0]["content"].as_str().unwrap().contains("500"));

    assert_eq!(responses[1]["modelId"], "model-healthy");
    assert_eq!(responses[1]["modelName"], "Healthy");
    assert_eq!(responses[1]["content"], "你好！");
    assert!(responses[1].get("error").is_none());
    assert!(responses[1]["responseTime"].is_u64());
    assert_ne!(responses[0]["id"], responses[1]["id"]);

    healthy_mock.assert_async().await;
    broken_mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_rejects_empty_message() {
    let dir = tempfile::tempdir().unwrap();
    let models_file = dir.path().join("models.json");
    write_models(
        &models_file,
        json!([{"id": "m", "name": "M", "base_url": "http://127.0.0.1:9", "api_key": "k", "model": "x"}]),
    );

    let addr = spawn_server(&models_file).await;
    let response = client()
        .post(format!("http://{}/api/chat", addr))
        .json(&json!({"message": "   "}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_chat_without_models_is_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir.path().join("absent.json")).await;

    let response = client()
        .post(format!("http://{}/api/chat", addr))
        .json(&json!({"message": "hello", "modelIds": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "未找到可用模型");
}

#[tokio::test]
async fn test_chat_malformed_body() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir.path().join("models.json")).await;

    let response = client()
        .post(format!("http://{}/api/chat", addr))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

/// 管理接口：新增、查询、停用、批量导入、删除
#[tokio::test]
async fn test_model_config_admin_flow() {
    let dir = tempfile::tempdir().unwrap();
    let models_file = dir.path().join("data").join("modelConfig.json");
    let addr = spawn_server(&models_file).await;
    let base = format!("http://{}/api/config", addr);
    let client = client();

    let created: Value = client
        .post(&base)
        .json(&json!({
            "name": "Groq Llama",
            "base_url": "https://api.groq.com/openai/v1",
            "api_key": "gsk-test",
            "model": "llama3-8b-8192"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("model-"));
    assert_eq!(created["active"], true);
    assert_eq!(created["dialect"], "groq");
    assert!(models_file.exists());

    let updated = client
        .put(format!("{}/{}", base, id))
        .json(&json!({"active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);
    let updated: Value = updated.json().await.unwrap();
    assert_eq!(updated["active"], false);
    assert_eq!(updated["name"], "Groq Llama");

    let missing = client
        .put(format!("{}/model-does-not-exist", base))
        .json(&json!({"active": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let imported = client
        .post(format!("{}/batch", base))
        .json(&json!([
            {"base_url": "https://api.openai.com/v1", "api_key": "sk-1", "model": "openai/gpt-4o"},
            {"base_url": "https://api.openai.com/v1", "api_key": "sk-2", "model": "gpt-4o-mini"}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(imported.status(), 201);
    let imported: Value = imported.json().await.unwrap();
    assert_eq!(imported[0]["name"], "gpt-4o");
    assert_eq!(imported[1]["name"], "gpt-4o-mini");

    let all: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 3);
    assert_eq!(all[0]["id"], id.as_str());

    let deleted = client
        .delete(format!("{}/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let all: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_metrics_and_unknown_route() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir.path().join("models.json")).await;
    let client = client();

    let metrics = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("multichat_dispatches_total"));

    let response = client
        .get(format!("http://{}/nope", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
