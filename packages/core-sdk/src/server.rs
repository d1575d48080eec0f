use std::{convert::Infallible, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{models::UserContext, pipe::ImagePipe};

/**
 * \brief 启动本地 HTTP 服务，向宿主暴露插件接口。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 * \details 收到 Ctrl-C 后停止接受请求，并释放插件持有的 HTTP 客户端。
 */
pub async fn run(addr: &str, pipe: ImagePipe) -> Result<()> {
    let pipe = Arc::new(pipe);
    let app = router(Arc::clone(&pipe));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipe.shutdown();
    Ok(())
}

/**
 * \brief 构造路由，测试中可直接挂到任意监听端口。
 */
pub fn router(pipe: Arc<ImagePipe>) -> Router {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/pipe", post(invoke_pipe))
        .route("/api/health", get(health_check))
        .with_state(pipe)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("listen for shutdown signal failed: {}", e);
    }
}

#[derive(Deserialize, Debug)]
struct PipeQuery {
    /** \brief 是否以 SSE 返回（默认 true） */
    stream: Option<bool>,
}

/**
 * \brief 插件注册列表：GET /api/models
 */
async fn list_models(State(pipe): State<Arc<ImagePipe>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": pipe.pipes() }))
}

/**
 * \brief 调用插件：POST /api/pipe
 * \details 请求为 `{ "body": 会话, "user": 用户 }`。body 交给插件自行解释，格式不对时以一条输出说明，
 * 而不是返回 4xx；user 无法识别时按匿名处理。
 * 默认以 SSE 推送，每条输出一个 message 事件，最后发送 done；`stream=false` 时一次性返回 JSON。
 */
async fn invoke_pipe(
    State(pipe): State<Arc<ImagePipe>>,
    Query(q): Query<PipeQuery>,
    Json(mut req): Json<Value>,
) -> Response {
    let body = req.get_mut("body").map(Value::take).unwrap_or(Value::Null);
    let user: UserContext = req
        .get_mut("user")
        .map(Value::take)
        .and_then(|u| serde_json::from_value(u).ok())
        .unwrap_or_default();

    if !q.stream.unwrap_or(true) {
        let messages = pipe.run_value(body, &user).await;
        return Json(serde_json::json!({ "messages": messages })).into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    tokio::spawn(async move {
        let mut outputs = pipe.pipe_value(body, &user);
        while let Some(item) = outputs.next().await {
            if tx.send(Ok(Event::default().event("message").data(item))).is_err() {
                pipe.telemetry().event("server.pipe", "client disconnected");
                return;
            }
        }
        let _ = tx.send(Ok(Event::default().event("done").data("[DONE]")));
    });

    let stream = UnboundedReceiverStream::new(rx);
    Sse::new(stream)
        .keep_alive(KeepAlive::new())
        .into_response()
}

/**
 * \brief 健康检查：返回当前配置摘要与客户端状态。
 */
async fn health_check(State(pipe): State<Arc<ImagePipe>>) -> Json<serde_json::Value> {
    let cfg = pipe.config();
    Json(serde_json::json!({
        "ok": cfg.validate().is_ok(),
        "variant": cfg.variant,
        "model": cfg.model_id,
        "running": pipe.is_running(),
    }))
}
