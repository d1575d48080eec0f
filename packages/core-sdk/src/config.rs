use std::{fmt, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipeError;

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL_ID: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_COST_PER_IMAGE: f64 = 0.1;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/**
 * \brief 两种适配策略。
 * \details ChatContent：只发送最后一条 user 消息，返回 choices[0].message.content 并附加费用；
 * Base64Image：原样转发消息，从响应中查找 Base64 图像并输出 data URL。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    #[serde(rename = "chat")]
    ChatContent,
    #[serde(rename = "base64")]
    Base64Image,
}

impl FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "a" => Ok(Variant::ChatContent),
            "base64" | "b" => Ok(Variant::Base64Image),
            other => Err(anyhow!("unknown variant: {}", other)),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::ChatContent => f.write_str("chat"),
            Variant::Base64Image => f.write_str("base64"),
        }
    }
}

/**
 * \brief 插件配置，初始化时构造，调用期间只读。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /** \brief 适配策略 */
    pub variant: Variant,
    /** \brief API 基地址（Base64Image 策略下为完整请求地址） */
    pub api_base_url: String,
    /** \brief API Key，为空时不发送 Authorization 头 */
    pub api_key: String,
    /** \brief 上游模型 ID */
    pub model_id: String,
    /** \brief 每次生成费用（元） */
    pub cost_per_image: f64,
    /** \brief 请求超时（秒），None 表示不限制 */
    pub request_timeout_secs: Option<u64>,
    /** \brief 是否写入本地诊断日志 */
    pub telemetry_enabled: bool,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: String::new(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            cost_per_image: DEFAULT_COST_PER_IMAGE,
            request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
            telemetry_enabled: false,
        }
    }
}

impl PipeConfig {
    /**
     * \brief 从 IMAGEPIPE_* 环境变量读取配置，未设置的项保留默认值。
     */
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief 通过任意查找函数读取配置，便于测试时不触碰进程环境。
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("IMAGEPIPE_VARIANT") {
            cfg.variant = v.parse::<Variant>().context("invalid IMAGEPIPE_VARIANT")?;
        }
        if let Some(v) = lookup("IMAGEPIPE_API_BASE_URL") {
            cfg.api_base_url = v;
        }
        if let Some(v) = lookup("IMAGEPIPE_API_KEY") {
            cfg.api_key = v;
        }
        if let Some(v) = lookup("IMAGEPIPE_MODEL_ID") {
            cfg.model_id = v;
        }
        if let Some(v) = lookup("IMAGEPIPE_COST_PER_IMAGE") {
            cfg.cost_per_image = v
                .trim()
                .parse::<f64>()
                .context("invalid IMAGEPIPE_COST_PER_IMAGE")?;
        }
        if let Some(v) = lookup("IMAGEPIPE_REQUEST_TIMEOUT") {
            let secs = v
                .trim()
                .parse::<u64>()
                .context("invalid IMAGEPIPE_REQUEST_TIMEOUT")?;
            cfg.request_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup("IMAGEPIPE_TELEMETRY") {
            cfg.telemetry_enabled = parse_bool(&v).context("invalid IMAGEPIPE_TELEMETRY")?;
        }
        Ok(cfg)
    }

    /**
     * \brief 校验必填项；失败时不应发起任何网络请求。
     */
    pub fn validate(&self) -> Result<(), PipeError> {
        if self.api_base_url.trim().is_empty() {
            return Err(PipeError::Config("API 地址未配置".to_string()));
        }
        if self.model_id.trim().is_empty() {
            return Err(PipeError::Config("模型 ID 未配置".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {}", other)),
    }
}
