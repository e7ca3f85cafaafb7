use std::fmt;
use thiserror::Error;

use crate::cron::CronError;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("配置校验失败:\n{0}")]
    Validation(ValidationReport),

    #[error("TOML 配置解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("环境变量文件解析错误: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("cron 表达式错误: {0}")]
    Cron(#[from] CronError),

    #[error("归档创建失败: {0}")]
    Archive(String),

    #[error("上传失败，共尝试 {attempts} 次: {source}")]
    Upload {
        attempts: u32,
        #[source]
        source: Box<BackupError>,
    },

    #[error("远程存储错误: {0}")]
    Remote(String),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("告警发送失败: {0}")]
    Alert(String),

    #[error("调度错误: {0}")]
    Schedule(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn alert(msg: impl Into<String>) -> Self {
        Self::Alert(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }

    /// 将最后一次上传错误包装为重试耗尽错误
    pub fn upload_exhausted(attempts: u32, last_error: BackupError) -> Self {
        Self::Upload {
            attempts,
            source: Box::new(last_error),
        }
    }
}

/// 启动阶段的配置校验报告，每条违规信息占一行
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// 没有违规时返回 `Ok(())`，否则返回聚合后的校验错误
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.violations.join("\n"))
    }
}
