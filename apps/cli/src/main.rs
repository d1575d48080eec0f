use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::Value;

use imagepipe_core_sdk::{
    config::{PipeConfig, Variant},
    models::{chat_message, ConversationPayload, UserContext},
    pipe::ImagePipe,
    server,
};

/**
 * \brief CLI 程序入口：本地调试插件或以 HTTP 服务形式托管插件。
 */
#[derive(Parser, Debug)]
#[command(name = "imagepipe", version, about = "Base64 image generation bridge")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/**
 * \brief 覆盖环境变量中的配置项。
 */
#[derive(Args, Debug)]
struct ConfigOverrides {
    /** \brief 适配策略：chat 或 base64 */
    #[arg(long, global = true)]
    variant: Option<Variant>,
    #[arg(long, global = true)]
    api_base_url: Option<String>,
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    model_id: Option<String>,
    /** \brief 请求超时（秒），0 表示不限制 */
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[arg(long, global = true, default_value_t = false)]
    telemetry: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 列出插件注册的模型。
     */
    Models,

    /**
     * \brief 发送一条提示词并打印插件输出。
     * \param extra 额外透传字段，格式 key=json，如 temperature=0.7
     */
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long = "extra", value_name = "KEY=JSON")]
        extra: Vec<String>,
    },

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

impl ConfigOverrides {
    fn apply(self, mut cfg: PipeConfig) -> PipeConfig {
        if let Some(v) = self.variant {
            cfg.variant = v;
        }
        if let Some(v) = self.api_base_url {
            cfg.api_base_url = v;
        }
        if let Some(v) = self.api_key {
            cfg.api_key = v;
        }
        if let Some(v) = self.model_id {
            cfg.model_id = v;
        }
        if let Some(secs) = self.timeout {
            cfg.request_timeout_secs = (secs > 0).then_some(secs);
        }
        if self.telemetry {
            cfg.telemetry_enabled = true;
        }
        cfg
    }
}

fn parse_extra(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("extra must be KEY=JSON, got {}", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipeConfig::from_env().context("load config from environment failed")?;
    let config = cli.overrides.apply(config);
    let pipe = ImagePipe::start(config).context("start image pipe failed")?;

    match cli.command {
        Commands::Models => {
            let models = pipe.pipes();
            if models.is_empty() {
                println!("No model configured, set IMAGEPIPE_MODEL_ID or pass --model-id");
            }
            for m in models {
                println!("{}\t{}", m.id, m.name);
            }
            pipe.shutdown();
        }
        Commands::Generate { prompt, extra } => {
            let mut payload = ConversationPayload {
                messages: vec![chat_message("user", prompt)],
                ..ConversationPayload::default()
            };
            for item in &extra {
                let (key, value) = parse_extra(item)?;
                payload.extra.insert(key, value);
            }

            let user = UserContext {
                name: Some("cli".to_string()),
                ..UserContext::default()
            };
            let mut outputs = pipe.pipe(payload, &user);
            while let Some(line) = outputs.next().await {
                println!("{}", line);
            }
            pipe.shutdown();
        }
        Commands::Serve { addr } => {
            server::run(&addr, pipe).await?;
        }
    }

    Ok(())
}
