use crate::config::SmtpConfig;
use crate::constants::smtp::{IMPLICIT_TLS_PORT, SUBJECT_PREFIX};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 一封告警邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub recipients: Vec<Mailbox>,
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    /// 备份失败告警，主题包含任务名称，正文为错误详情
    pub fn backup_failed(recipients: Vec<Mailbox>, job_name: &str, error: &BackupError) -> Self {
        Self {
            recipients,
            subject: format!("{SUBJECT_PREFIX}: {job_name}"),
            body: format!("备份任务 '{job_name}' 执行失败，错误信息:\n{error}"),
        }
    }
}

/// 告警发送通道
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<()>;
}

/// 通过 SMTP 中继发送纯文本邮件
pub struct SmtpAlertSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpAlertSink {
    /// 465 端口使用隐式 TLS，其余端口使用 STARTTLS
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let builder = if config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| BackupError::alert(format!("初始化 SMTP 连接失败: {e}")))?;

        let mut builder = builder.port(config.port);
        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl AlertSink for SmtpAlertSink {
    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &message.recipients {
            builder = builder.to(recipient.clone());
        }

        let email = builder
            .body(message.body.clone())
            .map_err(|e| BackupError::alert(format!("构建告警邮件失败: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| BackupError::alert(e.to_string()))?;
        Ok(())
    }
}

/// 尽力而为的失败告警：不重试、不排队，发送失败只记录日志
#[derive(Clone, Default)]
pub struct Notifier {
    sink: Option<Arc<dyn AlertSink>>,
    recipients: Vec<Mailbox>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn AlertSink>, recipients: Vec<Mailbox>) -> Self {
        Self {
            sink: Some(sink),
            recipients,
        }
    }

    /// 关闭告警
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 未配置 SMTP 时返回关闭告警的通知器
    pub fn from_config(smtp: Option<&SmtpConfig>) -> Result<Self> {
        match smtp {
            Some(config) => {
                let sink = SmtpAlertSink::new(config)?;
                info!(host = %config.host, port = config.port, recipients = config.to.len(), "已启用邮件告警");
                Ok(Self::new(Arc::new(sink), config.to.clone()))
            }
            None => {
                info!("未配置 SMTP，邮件告警已关闭");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some() && !self.recipients.is_empty()
    }

    pub async fn notify(&self, job_name: &str, error: &BackupError) {
        let Some(sink) = self.sink.as_ref().filter(|_| !self.recipients.is_empty()) else {
            debug!(job = job_name, "告警未启用，跳过通知");
            return;
        };

        let message = AlertMessage::backup_failed(self.recipients.clone(), job_name, error);
        match sink.send(&message).await {
            Ok(()) => info!(job = job_name, "已发送失败告警"),
            Err(e) => error!(job = job_name, error = %e, "发送告警失败"),
        }
    }
}
