use super::AppState;
use crate::chat::ChatRequest;
use crate::error::MultiChatError;
use crate::metrics;
use crate::registry::{ModelDraft, ModelPatch, ModelStore};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

// 统一的 Body 类型
type BoxError = Box<dyn std::error::Error + Send + Sync>;
type BoxBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// 处理 HTTP 请求的主路由
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<BoxBody>, BoxError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => preflight(),
        (&Method::GET, "/") => json_response(
            StatusCode::OK,
            &json!({ "message": "多模型对比聊天后端服务器运行中" }),
        ),
        (&Method::GET, "/health") => health_check(),
        (&Method::GET, "/metrics") => metrics_endpoint(),
        (&Method::POST, "/api/chat") => chat(req, &state).await,
        (&Method::GET, "/api/config") => list_models(&state).await,
        (&Method::POST, "/api/config") => add_model(req, &state).await,
        (&Method::POST, "/api/config/batch") => import_models(req, &state).await,
        (&Method::PUT, _) => match model_id_from_path(&path) {
            Some(id) => update_model(req, &state, id).await,
            None => not_found(),
        },
        (&Method::DELETE, _) => match model_id_from_path(&path) {
            Some(id) => delete_model(&state, id).await,
            None => not_found(),
        },
        _ => not_found(),
    };

    Ok(with_cors(response))
}

/// `/api/config/{id}` 中的 id
fn model_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/api/config/")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// 健康检查端点
fn health_check() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "service": "multichat"
        }),
    )
}

/// 指标端点
fn metrics_endpoint() -> Response<BoxBody> {
    let body = metrics::global_metrics().export_prometheus();
    let mut response = Response::new(full(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

/// 多模型对比聊天
async fn chat(req: Request<hyper::body::Incoming>, state: &AppState) -> Response<BoxBody> {
    let chat_req: ChatRequest = match read_json(req).await {
        Ok(chat_req) => chat_req,
        Err(e) => return error_response(&e),
    };

    match state.chat.dispatch_chat(chat_req).await {
        Ok(envelope) => json_response(StatusCode::OK, &envelope),
        Err(e) => error_response(&e),
    }
}

async fn list_models(state: &AppState) -> Response<BoxBody> {
    match state.store.list_all().await {
        Ok(models) => json_response(StatusCode::OK, &models),
        Err(e) => error_response(&e),
    }
}

async fn add_model(req: Request<hyper::body::Incoming>, state: &AppState) -> Response<BoxBody> {
    let result = match read_json::<ModelDraft>(req).await {
        Ok(draft) => state.store.add(draft).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(model) => json_response(StatusCode::CREATED, &model),
        Err(e) => error_response(&e),
    }
}

async fn import_models(req: Request<hyper::body::Incoming>, state: &AppState) -> Response<BoxBody> {
    let result = match read_json::<Vec<ModelDraft>>(req).await {
        Ok(drafts) => state.store.import_batch(drafts).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(models) => json_response(StatusCode::CREATED, &models),
        Err(e) => error_response(&e),
    }
}

async fn update_model(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
    id: &str,
) -> Response<BoxBody> {
    let result = match read_json::<ModelPatch>(req).await {
        Ok(patch) => state.store.update(id, patch).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(model) => json_response(StatusCode::OK, &model),
        Err(e) => error_response(&e),
    }
}

async fn delete_model(state: &AppState, id: &str) -> Response<BoxBody> {
    match state.store.delete(id).await {
        Ok(_) => json_response(StatusCode::OK, &json!({ "message": "删除配置成功" })),
        Err(e) => error_response(&e),
    }
}

/// 读取并解析 JSON 请求体，格式错误属于调用方错误
async fn read_json<T: DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, MultiChatError> {
    let whole_body = req
        .collect()
        .await
        .map_err(|e| MultiChatError::validation(format!("读取请求体失败: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&whole_body)
        .map_err(|e| MultiChatError::validation(format!("请求体格式错误: {}", e)))
}

fn error_response(err: &MultiChatError) -> Response<BoxBody> {
    let (status, error_type) = match err {
        MultiChatError::ModelNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error"),
        e if e.is_client_error() => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "multichat_error"),
    };

    if status.is_server_error() {
        error!("处理请求失败: {}", err);
    }

    json_response(
        status,
        &json!({
            "error": {
                "message": err.to_string(),
                "type": error_type
            }
        }),
    )
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("序列化响应失败: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":{"message":"serialization failure","type":"multichat_error"}}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(full(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn preflight() -> Response<BoxBody> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, authorization"),
    );
    response
}

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// 404 响应
fn not_found() -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &json!({
            "error": {
                "message": "Not Found",
                "type": "not_found_error"
            }
        }),
    )
}

fn full(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into())
        .map_err(|e| Box::new(e) as BoxError)
        .boxed()
}
