use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/**
 * \brief 构造一条 OpenAI Chat 格式的消息。
 */
pub fn chat_message(role: &str, content: impl Into<Value>) -> Value {
    json!({ "role": role, "content": content.into() })
}

/**
 * \brief 宿主传入的会话请求体。
 * \details 消息保留为原始 JSON，转发时逐字节不变；缺少 role 或 content 的消息同样保留。
 * `messages` 为 null 时视为空列表。其余顶层字段（temperature 等）按原始顺序保存在 `extra` 中。
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ConversationPayload {
    /**
     * \brief 从宿主的 JSON 请求体构造。
     */
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /**
     * \brief 从末尾向前查找最近一条 role 为 user 的消息；没有 role 的消息被跳过。
     */
    pub fn last_user_message(&self) -> Option<&Value> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
    }

    /**
     * \brief 请求体中显式声明的 stream 标志；非布尔值视为未声明。
     */
    pub fn stream_flag(&self) -> Option<bool> {
        self.extra.get("stream").and_then(Value::as_bool)
    }
}

/**
 * \brief 调用方的用户上下文，仅用于日志归因。
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserContext {
    /**
     * \brief 日志中的用户标识：优先 id，其次 name，附带角色。
     */
    pub fn label(&self) -> String {
        let who = self
            .id
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("anonymous");
        match self.role.as_deref() {
            Some(role) if !role.is_empty() => format!("{}({})", who, role),
            _ => who.to_string(),
        }
    }
}

/**
 * \brief 插件注册列表中的一项。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /** \brief 上游模型 ID */
    pub id: String,
    /** \brief 展示名称 */
    pub name: String,
}
