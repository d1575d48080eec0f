use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const LOG_FILE_NAME: &str = "imagepipe.log";
const DEFAULT_LOG_DIR: &str = "logs";

/**
 * \brief 插件实例自己的诊断日志。
 * \details 开关与目录随实例保存，同一进程中的多个插件互不影响；关闭时不触碰文件系统。
 */
#[derive(Debug, Clone)]
pub struct Telemetry {
    enabled: bool,
    dir: PathBuf,
}

impl Telemetry {
    /**
     * \brief 日志目录取 IMAGEPIPE_LOG_DIR，未设置时为 ./logs。
     */
    pub fn new(enabled: bool) -> Self {
        let dir = std::env::var("IMAGEPIPE_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR));
        Self { enabled, dir }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    pub fn event(&self, category: &str, message: &str) {
        self.write("INFO", category, message);
    }

    pub fn error(&self, category: &str, message: &str) {
        self.write("ERROR", category, message);
    }

    /**
     * \brief 记录完整的 JSON 响应，供运维排查上游返回结构。
     */
    pub fn payload(&self, category: &str, payload: &Value) {
        if !self.enabled {
            return;
        }
        let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        self.write("DEBUG", category, &body);
    }

    fn write(&self, level: &str, category: &str, message: &str) {
        if !self.enabled {
            return;
        }
        if let Err(err) = append_line(&self.dir, level, category, message) {
            eprintln!("telemetry write failed: {}", err);
        }
    }
}

fn append_line(dir: &Path, level: &str, category: &str, message: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enabled_writes_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = Telemetry::new(true).with_dir(dir.path());
        log.event("pipe", "start");
        log.error("dispatch", "send failed");
        log.payload("pipe.locate", &json!({"data": []}));

        let text = fs::read_to_string(log.log_file()).expect("read log");
        assert!(text.contains("[INFO] pipe - start"));
        assert!(text.contains("[ERROR] dispatch - send failed"));
        assert!(text.contains("[DEBUG] pipe.locate - {"));
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = Telemetry::new(false).with_dir(dir.path().join("nested"));
        log.event("pipe", "start");
        log.payload("pipe.locate", &json!({}));
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_instances_are_independent() {
        let on_dir = tempfile::tempdir().expect("temp dir");
        let off_dir = tempfile::tempdir().expect("temp dir");
        let on = Telemetry::new(true).with_dir(on_dir.path());
        let off = Telemetry::new(false).with_dir(off_dir.path());

        off.event("pipe", "quiet");
        on.event("pipe", "loud");

        assert!(on.log_file().exists());
        assert!(!off.log_file().exists());
        assert!(on.is_enabled() && !off.is_enabled());
    }
}
