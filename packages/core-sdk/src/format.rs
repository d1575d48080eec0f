use std::error::Error as _;

use serde_json::Value;

use crate::error::PipeError;

pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/** \brief 提交请求后、结果返回前推送的状态消息。 */
pub const STATUS_SUBMITTED: &str = "⏳ 任务已提交，正在生成图片...";

pub const NOT_FOUND_MESSAGE: &str =
    "❌ 未能在 API 响应中找到 Base64 图像数据，完整响应已写入诊断日志。";

pub fn data_url(payload: &str) -> String {
    format!("{}{}", DATA_URL_PREFIX, payload)
}

pub fn cost_line(cost: f64) -> String {
    format!("本次生成消耗{:.4}元", cost)
}

/**
 * \brief 在模型回复后追加费用说明，中间空一行。
 */
pub fn with_cost(content: &str, cost: f64) -> String {
    format!("{}\n\n{}", content, cost_line(cost))
}

/**
 * \brief 读取 OpenAI 风格响应中的 choices[0].message.content。
 * \details 字符串原样返回；其他非 null 值序列化为紧凑 JSON。
 */
pub fn extract_chat_content(v: &Value) -> Result<String, PipeError> {
    let content = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .filter(|c| !c.is_null())
        .ok_or(PipeError::MissingField("choices[0].message.content"))?;
    Ok(match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/**
 * \brief 把错误转换为返回给用户的唯一一条消息。
 */
pub fn render_error(err: &PipeError) -> String {
    match err {
        PipeError::Config(msg) => format!("❌ 配置错误：{}", msg),
        PipeError::Payload(msg) => format!("❌ 请求体格式错误：{}", msg),
        PipeError::Http { status, body, .. } => format!("API请求失败：{}\n{}", status, body),
        PipeError::Parse { excerpt } => format!("API 返回的内容不是合法 JSON：\n{}", excerpt),
        PipeError::NotFound => NOT_FOUND_MESSAGE.to_string(),
        PipeError::MissingField(_) | PipeError::Transport(_) | PipeError::Client(_) => {
            format!("发生未知错误: {}\n{}", err, error_chain(err))
        }
    }
}

/**
 * \brief 逐层展开错误来源，作为诊断用的调用链。
 */
fn error_chain(err: &PipeError) -> String {
    let mut lines = vec![format!("Error: {:?}", err)];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("Caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}
