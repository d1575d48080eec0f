use serde_json::Value;

/** \brief 键名中出现任一片段即视为可能承载图像数据（区分大小写）。 */
pub const KEY_HINTS: [&str; 3] = ["b64", "base64", "image"];

/** \brief 候选字符串必须严格长于该长度。 */
pub const MIN_PAYLOAD_LEN: usize = 100;

/**
 * \brief 在任意结构的 JSON 中深度优先查找 Base64 图像字符串。
 * \details 先序遍历：对象按文档键序，数组按下标序；命中即返回。
 * 只要键名带提示片段且字符串足够长就会命中，即使内容并非图像。
 */
pub fn locate(node: &Value) -> Option<&str> {
    match node {
        Value::Object(map) => map.iter().find_map(|(key, value)| {
            match value {
                Value::String(s) if key_looks_like_image(key) && is_long_enough(s) => {
                    Some(s.as_str())
                }
                other => locate(other),
            }
        }),
        Value::Array(items) => items.iter().find_map(locate),
        _ => None,
    }
}

pub fn key_looks_like_image(key: &str) -> bool {
    KEY_HINTS.iter().any(|hint| key.contains(hint))
}

fn is_long_enough(s: &str) -> bool {
    s.chars().count() > MIN_PAYLOAD_LEN
}
