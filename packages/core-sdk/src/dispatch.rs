use std::sync::Mutex;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Map, Value};

use crate::{
    config::{PipeConfig, Variant},
    error::PipeError,
    models::ConversationPayload,
    telemetry::Telemetry,
};

/** \brief 由适配器自身写入、不从请求体透传的字段。 */
pub const RESERVED_FIELDS: [&str; 3] = ["model", "messages", "stream"];

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/**
 * \brief 适配器持有的共享 HTTP 客户端。
 * \details 在 `ImagePipe::start` 时创建、`shutdown` 时关闭；
 * 取用时若客户端不存在或已关闭，则在锁内重新创建，保证并发下只会生成一个实例。
 */
#[derive(Debug, Default)]
pub struct HttpPool {
    inner: Mutex<Option<reqwest::Client>>,
}

impl HttpPool {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief 取得客户端，必要时创建。
     */
    pub fn get_or_create(&self) -> Result<reqwest::Client, PipeError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| PipeError::Client("client pool lock poisoned".to_string()))?;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipeError::Client(e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /**
     * \brief 释放客户端及其连接池。
     */
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }
}

/**
 * \brief 计算请求地址：ChatContent 追加 chat-completions 路径，Base64Image 原样使用。
 */
pub fn endpoint_url(config: &PipeConfig) -> String {
    match config.variant {
        Variant::ChatContent => format!(
            "{}{}",
            config.api_base_url.trim().trim_end_matches('/'),
            CHAT_COMPLETIONS_PATH
        ),
        Variant::Base64Image => config.api_base_url.trim().to_string(),
    }
}

pub fn build_headers(config: &PipeConfig) -> Result<HeaderMap, PipeError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if config.has_api_key() {
        let value = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|_| PipeError::Config("API Key 含有非法字符".to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/**
 * \brief 组装请求体。
 * \details 先写入 model/messages/stream，再追加请求体中的其余字段；
 * 保留字段永远不会被透传覆盖，两种策略规则一致。
 */
pub fn build_body(config: &PipeConfig, payload: &ConversationPayload) -> Value {
    let (messages, stream): (Vec<Value>, bool) = match config.variant {
        Variant::ChatContent => (
            payload.last_user_message().cloned().into_iter().collect(),
            false,
        ),
        Variant::Base64Image => (
            payload.messages.clone(),
            payload.stream_flag().unwrap_or(false),
        ),
    };

    let mut body = Map::new();
    body.insert("model".to_string(), json!(config.model_id));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("stream".to_string(), Value::Bool(stream));
    for (key, value) in &payload.extra {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

/**
 * \brief 发送一次请求并对结果分类。
 * \return 成功时为解析后的 JSON；状态码 >= 400、非 JSON 响应、传输失败分别映射为对应错误。
 */
pub async fn dispatch(
    pool: &HttpPool,
    telemetry: &Telemetry,
    config: &PipeConfig,
    payload: &ConversationPayload,
) -> Result<Value, PipeError> {
    config.validate()?;

    let url = endpoint_url(config);
    let headers = build_headers(config)?;
    let body = build_body(config, payload);
    let client = pool.get_or_create()?;

    telemetry.event(
        "dispatch",
        &format!(
            "variant={} url={} model={} msgs={}",
            config.variant,
            url,
            config.model_id,
            body["messages"].as_array().map(Vec::len).unwrap_or(0)
        ),
    );

    let mut request = client.post(&url).headers(headers).json(&body);
    if let Some(timeout) = config.timeout() {
        request = request.timeout(timeout);
    }

    let resp = request.send().await.map_err(|e| {
        telemetry.error("dispatch", &format!("send failed: {}", e));
        PipeError::Transport(e)
    })?;

    let status = resp.status();
    let text = resp.text().await?;

    if status.as_u16() >= 400 {
        telemetry.error(
            "dispatch",
            &format!("upstream status={} body_len={}", status.as_u16(), text.len()),
        );
        return Err(PipeError::Http {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
            body: text,
        });
    }

    serde_json::from_str(&text).map_err(|e| {
        telemetry.error("dispatch", &format!("invalid json: {}", e));
        PipeError::parse(&text)
    })
}
