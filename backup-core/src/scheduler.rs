//! # 定时调度
//!
//! 每个任务一个触发协程：计算下一次触发时间 → 睡眠到该时间 → 触发执行。
//!
//! - 同一任务的执行互斥：上一次执行尚未结束时，新的触发直接跳过并记录警告
//! - 不同任务之间互不影响，可以同时执行
//! - 执行在 [`TaskTracker`] 上启动，停止时先取消触发，再等待正在执行的任务结束

use crate::constants::scheduler::MAX_SLEEP_SLICE;
use crate::error::{BackupError, Result};
use crate::job::JobSpec;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 任务执行器，由调度器在触发时调用
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobSpec);
}

/// 单次触发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// 同一任务仍在执行，本次触发被跳过
    Skipped,
}

/// 已注册的任务及其执行互斥锁
#[derive(Clone)]
pub struct ScheduledJob {
    job: Arc<JobSpec>,
    executor: Arc<dyn JobExecutor>,
    running: Arc<Mutex<()>>,
}

impl ScheduledJob {
    pub fn new(job: JobSpec, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            job: Arc::new(job),
            executor,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.job
    }

    /// 在 `tracker` 上启动一次执行；互斥锁随执行结束（包括 panic）释放
    pub fn fire(&self, tracker: &TaskTracker) -> FireOutcome {
        let Ok(guard) = self.running.clone().try_lock_owned() else {
            warn!(job = %self.job.name, "上一次执行尚未结束，跳过本次触发");
            return FireOutcome::Skipped;
        };

        let job = self.job.clone();
        let executor = self.executor.clone();
        tracker.spawn(async move {
            let _guard = guard;
            executor.execute(&job).await;
        });
        FireOutcome::Started
    }
}

/// 调度器，注册完所有任务后调用 [`Scheduler::start`] 启动
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务；名称重复或调度表达式永远不会触发时返回错误
    pub fn register(&mut self, job: JobSpec, executor: Arc<dyn JobExecutor>) -> Result<()> {
        if self.jobs.iter().any(|existing| existing.name() == job.name) {
            return Err(BackupError::schedule(format!(
                "任务名称重复: {}",
                job.name
            )));
        }

        let Some(next) = job.schedule.next_fire(&Local::now()) else {
            return Err(BackupError::schedule(format!(
                "任务 '{}' 的调度表达式 '{}' 永远不会触发",
                job.name, job.schedule
            )));
        };

        info!(
            job = %job.name,
            schedule = %job.schedule,
            "已注册备份任务，下次执行时间: {}",
            next.format("%Y-%m-%d %H:%M:%S")
        );
        self.jobs.push(ScheduledJob::new(job, executor));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 为每个任务启动触发协程，返回时所有触发器均已就绪
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let triggers = self
            .jobs
            .iter()
            .map(|job| tokio::spawn(trigger_loop(job.clone(), tracker.clone(), cancel.clone())))
            .collect();

        info!(jobs = self.jobs.len(), "调度器已启动");
        SchedulerHandle {
            jobs: self.jobs,
            tracker,
            cancel,
            triggers,
        }
    }
}

/// 运行中的调度器
pub struct SchedulerHandle {
    jobs: Vec<ScheduledJob>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    triggers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// 仍在运行的触发器数量
    pub fn armed(&self) -> usize {
        self.triggers.iter().filter(|t| !t.is_finished()).count()
    }

    /// 正在执行的任务数量
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 立即触发指定任务，与定时触发遵循相同的互斥规则
    pub fn trigger(&self, name: &str) -> Result<FireOutcome> {
        if self.cancel.is_cancelled() {
            return Err(BackupError::schedule("调度器正在停止"));
        }
        let job = self
            .jobs
            .iter()
            .find(|job| job.name() == name)
            .ok_or_else(|| BackupError::schedule(format!("未找到任务: {name}")))?;
        Ok(job.fire(&self.tracker))
    }

    /// 停止调度：不再产生新的触发，最多等待 `timeout` 让正在执行的任务结束
    ///
    /// 所有任务在超时前结束时返回 true。
    pub async fn shutdown(self, timeout: Duration) -> bool {
        info!("正在停止调度器...");
        self.cancel.cancel();
        for trigger in self.triggers {
            if let Err(e) = trigger.await {
                error!(error = %e, "触发器异常退出");
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "等待正在执行的任务结束 (最多 {} 秒)", timeout.as_secs());
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("调度器已停止");
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.tracker.len(),
                    "等待超时，仍有任务未结束"
                );
                false
            }
        }
    }
}

async fn trigger_loop(job: ScheduledJob, tracker: TaskTracker, cancel: CancellationToken) {
    loop {
        let Some(next) = job.spec().schedule.next_fire(&Local::now()) else {
            warn!(job = %job.name(), "调度表达式不再有触发时间，停止该任务的调度");
            return;
        };
        debug!(job = %job.name(), "下次执行时间: {}", next.format("%Y-%m-%d %H:%M:%S"));

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep_until_wall_clock(next) => {}
        }

        if !cancel.is_cancelled() {
            job.fire(&tracker);
        }
    }
}

/// 按墙上时钟睡眠到 `deadline`
///
/// 单次睡眠不超过 [`MAX_SLEEP_SLICE`]，系统时间被调整或机器休眠后能及时修正。
async fn sleep_until_wall_clock(deadline: DateTime<Local>) {
    loop {
        let Ok(remaining) = deadline.signed_duration_since(Local::now()).to_std() else {
            return;
        };
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(MAX_SLEEP_SLICE)).await;
    }
}
