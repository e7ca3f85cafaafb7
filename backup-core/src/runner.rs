use crate::archive::ArchiveBuilder;
use crate::config::AppConfig;
use crate::error::{BackupError, Result};
use crate::job::{ExecutionResult, JobSpec};
use crate::notifier::Notifier;
use crate::scheduler::JobExecutor;
use crate::uploader::RemoteUploader;
use crate::webdav::WebDavClient;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// 执行单次备份：归档 → 上传 → 清理本地文件 → 失败告警
#[derive(Clone)]
pub struct JobRunner {
    cache_dir: PathBuf,
    archiver: ArchiveBuilder,
    uploader: RemoteUploader,
    notifier: Notifier,
}

impl JobRunner {
    pub fn new(
        cache_dir: PathBuf,
        archiver: ArchiveBuilder,
        uploader: RemoteUploader,
        notifier: Notifier,
    ) -> Self {
        Self {
            cache_dir,
            archiver,
            uploader,
            notifier,
        }
    }

    /// 按配置组装 WebDAV 上传器和邮件告警
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = WebDavClient::new(&config.webdav)?;
        let notifier = Notifier::from_config(config.smtp.as_ref())?;

        Ok(Self::new(
            config.cache_dir.clone(),
            ArchiveBuilder::new(config.compression_level),
            RemoteUploader::new(Arc::new(store)),
            notifier,
        ))
    }

    pub async fn run(&self, job: &JobSpec) -> ExecutionResult {
        self.run_at(job, Local::now()).await
    }

    /// 以给定的启动时间执行一次备份，归档文件名由该时间决定
    #[instrument(skip_all, fields(job = %job.name))]
    pub async fn run_at(&self, job: &JobSpec, started_at: DateTime<Local>) -> ExecutionResult {
        info!("开始执行备份任务");
        let clock = Instant::now();

        let (attempts, outcome) = self.backup(job, started_at).await;
        if let Err(e) = &outcome {
            self.notifier.notify(&job.name, e).await;
        }

        let result = ExecutionResult {
            job_name: job.name.clone(),
            started_at,
            duration: clock.elapsed(),
            attempts,
            error: outcome.err(),
        };

        match &result.error {
            None => info!(
                attempts = result.attempts,
                "备份任务完成，耗时 {:.1} 秒",
                result.duration.as_secs_f64()
            ),
            Some(e) => error!(
                attempts = result.attempts,
                error = %e,
                "备份任务失败，耗时 {:.1} 秒",
                result.duration.as_secs_f64()
            ),
        }
        result
    }

    /// 返回上传尝试次数和执行结果；本地归档无论成败都会被删除
    async fn backup(&self, job: &JobSpec, started_at: DateTime<Local>) -> (u32, Result<()>) {
        let local_path = self.cache_dir.join(job.artifact_file_name(&started_at));

        // 同名文件不属于本次执行，不能在失败清理时删掉
        match tokio::fs::try_exists(&local_path).await {
            Ok(false) => {}
            Ok(true) => {
                return (
                    0,
                    Err(BackupError::archive(format!(
                        "归档文件已存在: {}",
                        local_path.display()
                    ))),
                );
            }
            Err(e) => return (0, Err(e.into())),
        }

        info!(source = %job.source_dir.display(), "开始创建归档: {}", local_path.display());
        let artifact = match self
            .archiver
            .build(&job.source_dir, &local_path, started_at)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                remove_local_artifact(&local_path).await;
                return (0, Err(e));
            }
        };
        info!(
            "归档创建完成: {} ({:.2} MB)",
            artifact.file_name(),
            artifact.size_mb()
        );

        let remote_path = job.remote_file_path(&artifact.file_name());
        let uploaded = self
            .uploader
            .upload(&artifact.path, &remote_path, job.retries)
            .await;
        remove_local_artifact(&artifact.path).await;

        match uploaded {
            Ok(attempts) => (attempts, Ok(())),
            Err(e) => {
                let attempts = match &e {
                    BackupError::Upload { attempts, .. } => *attempts,
                    _ => 0,
                };
                (attempts, Err(e))
            }
        }
    }
}

async fn remove_local_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("已删除本地归档: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "删除本地归档失败: {}", path.display()),
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn execute(&self, job: &JobSpec) {
        self.run(job).await;
    }
}
