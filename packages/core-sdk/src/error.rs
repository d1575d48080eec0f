use thiserror::Error;

/** \brief 解析失败时保留的原始响应最大字符数。 */
pub const EXCERPT_LIMIT: usize = 500;

/**
 * \brief 一次调用可能出现的全部错误。
 */
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("配置错误：{0}")]
    Config(String),

    #[error("请求体格式错误：{0}")]
    Payload(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },

    #[error("响应不是合法的 JSON：{excerpt}")]
    Parse { excerpt: String },

    #[error("响应缺少字段 {0}")]
    MissingField(&'static str),

    #[error("响应中未找到 Base64 图像数据")]
    NotFound,

    #[error("请求发送失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP 客户端初始化失败: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Payload,
    Http,
    Parse,
    MissingField,
    NotFound,
    Transport,
}

impl PipeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipeError::Config(_) => ErrorKind::Config,
            PipeError::Payload(_) => ErrorKind::Payload,
            PipeError::Http { .. } => ErrorKind::Http,
            PipeError::Parse { .. } => ErrorKind::Parse,
            PipeError::MissingField(_) => ErrorKind::MissingField,
            PipeError::NotFound => ErrorKind::NotFound,
            PipeError::Transport(_) | PipeError::Client(_) => ErrorKind::Transport,
        }
    }

    /**
     * \brief 以解析失败包装原始响应，仅保留前 500 个字符。
     */
    pub fn parse(raw: &str) -> Self {
        PipeError::Parse {
            excerpt: excerpt(raw),
        }
    }
}

/**
 * \brief 按字符截断，避免切断多字节字符。
 */
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_LIMIT) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_keeps_short_text() {
        assert_eq!(excerpt("not json"), "not json");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "图".repeat(EXCERPT_LIMIT + 20);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), EXCERPT_LIMIT);
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(PipeError::parse("x").kind(), ErrorKind::Parse);
        assert_eq!(PipeError::NotFound.kind(), ErrorKind::NotFound);
        assert_eq!(PipeError::Payload("x".into()).kind(), ErrorKind::Payload);
        assert_eq!(
            PipeError::Http {
                status: 500,
                message: "Internal Server Error".into(),
                body: String::new(),
            }
            .kind(),
            ErrorKind::Http
        );
    }
}
