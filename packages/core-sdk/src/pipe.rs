use std::pin::Pin;

use futures_util::{future, stream, Stream, StreamExt};
use serde_json::Value;

use crate::{
    config::{PipeConfig, Variant},
    dispatch::{dispatch, HttpPool},
    error::PipeError,
    format::{data_url, extract_chat_content, render_error, with_cost, STATUS_SUBMITTED},
    locator::locate,
    models::{ConversationPayload, ModelEntry, UserContext},
    telemetry::Telemetry,
};

const CHAT_DISPLAY_PREFIX: &str = "最终计费图像模型";
const BASE64_DISPLAY_PREFIX: &str = "Base64 图像模型";

/**
 * \brief 图像生成插件：宿主通过 `pipes` 获取模型列表，通过 `pipe` 发起生成。
 * \details HTTP 客户端与诊断日志由实例持有，`start` 时创建，`shutdown` 时释放客户端。
 */
#[derive(Debug)]
pub struct ImagePipe {
    config: PipeConfig,
    pool: HttpPool,
    telemetry: Telemetry,
}

impl ImagePipe {
    /**
     * \brief 初始化插件并建立共享 HTTP 客户端。
     */
    pub fn start(config: PipeConfig) -> Result<Self, PipeError> {
        let telemetry = Telemetry::new(config.telemetry_enabled);
        Self::start_with(config, telemetry)
    }

    /**
     * \brief 使用指定的诊断日志初始化插件。
     */
    pub fn start_with(config: PipeConfig, telemetry: Telemetry) -> Result<Self, PipeError> {
        let pool = HttpPool::new();
        pool.get_or_create()?;
        telemetry.event(
            "pipe",
            &format!("start variant={} model={}", config.variant, config.model_id),
        );
        Ok(Self {
            config,
            pool,
            telemetry,
        })
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_open()
    }

    /**
     * \brief 关闭共享客户端。之后的调用会按需重建客户端。
     */
    pub fn shutdown(&self) {
        self.pool.close();
        self.telemetry.event("pipe", "shutdown");
    }

    /**
     * \brief 插件注册列表；未配置模型 ID 时为空。
     */
    pub fn pipes(&self) -> Vec<ModelEntry> {
        let model_id = self.config.model_id.trim();
        if model_id.is_empty() {
            return Vec::new();
        }
        let prefix = match self.config.variant {
            Variant::ChatContent => CHAT_DISPLAY_PREFIX,
            Variant::Base64Image => BASE64_DISPLAY_PREFIX,
        };
        vec![ModelEntry {
            id: model_id.to_string(),
            name: format!("{}: {}", prefix, model_id),
        }]
    }

    /**
     * \brief 处理一次宿主调用，按顺序产出状态消息与最终结果。
     * \details ChatContent 先推送一条“已提交”状态；任何错误都会转为一条说明文字，不会向宿主抛出。
     */
    pub fn pipe<'a>(
        &'a self,
        payload: ConversationPayload,
        user: &UserContext,
    ) -> Pin<Box<dyn Stream<Item = String> + Send + 'a>> {
        let who = user.label();

        let out = async_stream::stream! {
            if let Err(err) = self.config.validate() {
                yield render_error(&err);
                return;
            }

            self.telemetry.event(
                "pipe",
                &format!("invoke user={} msgs={}", who, payload.messages.len()),
            );

            if self.config.variant == Variant::ChatContent {
                yield STATUS_SUBMITTED.to_string();
            }

            match self.generate(&payload).await {
                Ok(result) => {
                    yield result;
                }
                Err(err) => {
                    self.telemetry.error("pipe", &format!("user={} error={}", who, err));
                    yield render_error(&err);
                }
            }
        };
        Box::pin(out)
    }

    /**
     * \brief 以原始 JSON 接收宿主请求体。
     * \details 请求体无法解释为会话（如 messages 不是数组）时，只产出一条格式错误说明。
     */
    pub fn pipe_value<'a>(
        &'a self,
        body: Value,
        user: &UserContext,
    ) -> Pin<Box<dyn Stream<Item = String> + Send + 'a>> {
        match ConversationPayload::from_value(body) {
            Ok(payload) => self.pipe(payload, user),
            Err(e) => {
                let err = PipeError::Payload(e.to_string());
                self.telemetry
                    .error("pipe", &format!("user={} error={}", user.label(), err));
                Box::pin(stream::once(future::ready(render_error(&err))))
            }
        }
    }

    /**
     * \brief 收集 `pipe` 的全部输出。
     */
    pub async fn run(&self, payload: ConversationPayload, user: &UserContext) -> Vec<String> {
        self.pipe(payload, user).collect().await
    }

    pub async fn run_value(&self, body: Value, user: &UserContext) -> Vec<String> {
        self.pipe_value(body, user).collect().await
    }

    /**
     * \brief 发送请求并按策略格式化结果。
     */
    pub async fn generate(&self, payload: &ConversationPayload) -> Result<String, PipeError> {
        let response = dispatch(&self.pool, &self.telemetry, &self.config, payload).await?;
        match self.config.variant {
            Variant::ChatContent => {
                let content = extract_chat_content(&response)?;
                Ok(with_cost(&content, self.config.cost_per_image))
            }
            Variant::Base64Image => match locate(&response) {
                Some(found) => Ok(data_url(found)),
                None => {
                    self.telemetry.payload("pipe.locate", &response);
                    Err(PipeError::NotFound)
                }
            },
        }
    }
}
