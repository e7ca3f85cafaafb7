use anyhow::{Context, Result};
use backup_core::config::AppConfig;
use backup_core::constants::scheduler::DEFAULT_SHUTDOWN_TIMEOUT;
use backup_core::runner::JobRunner;
use backup_core::scheduler::Scheduler;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 备份服务：加载配置、注册任务，运行到收到停止信号
pub struct ServiceApp {
    scheduler: Scheduler,
}

impl ServiceApp {
    /// 任何配置或注册错误都会在启动调度器之前返回
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = AppConfig::load_from_file(config_path)
            .with_context(|| format!("加载配置文件 {} 失败", config_path.display()))?;
        info!(
            jobs = config.jobs.len(),
            cache_dir = %config.cache_dir.display(),
            webdav = %config.webdav.url,
            "配置加载完成"
        );

        let runner = Arc::new(JobRunner::from_config(&config).context("初始化备份执行器失败")?);

        let mut scheduler = Scheduler::new();
        for job in &config.jobs {
            scheduler
                .register(job.clone(), runner.clone())
                .with_context(|| format!("注册备份任务 '{}' 失败", job.name))?;
        }

        Ok(Self { scheduler })
    }

    #[cfg(test)]
    fn job_count(&self) -> usize {
        self.scheduler.len()
    }

    /// 运行到 SIGINT / SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handle = self.scheduler.start();
        info!(armed = handle.armed(), "备份服务已启动，等待定时触发");

        shutdown.await;
        info!("收到停止信号");

        if !handle.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await {
            warn!("部分备份任务未能在超时前结束，强制退出");
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "无法监听 SIGTERM 信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
