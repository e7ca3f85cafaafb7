use crate::constants::archive;
use crate::cron::CronSchedule;
use crate::error::BackupError;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

/// 备份任务定义，启动时由配置生成，之后只读
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// 任务名称，唯一，用于日志、告警和归档文件命名
    pub name: String,
    /// 要备份的源目录
    pub source_dir: PathBuf,
    /// 远程存储中的目标目录
    pub remote_path: String,
    /// 调度表达式
    pub schedule: CronSchedule,
    /// 上传最多尝试次数
    pub retries: u32,
}

impl JobSpec {
    /// 生成本次执行的归档文件名：`{name}-{YYYYMMDD-HHMMSS}.tar.gz`
    pub fn artifact_file_name(&self, at: &DateTime<Local>) -> String {
        format!(
            "{}-{}.{}",
            self.name,
            at.format(archive::TIMESTAMP_FORMAT),
            archive::FILE_EXTENSION
        )
    }

    /// 归档在远程存储中的完整路径
    pub fn remote_file_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.remote_path.trim_end_matches('/'), file_name)
    }
}

/// 单次执行产生的本地归档文件
#[derive(Debug, Clone)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Local>,
}

impl ArchiveArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 以 MB 为单位的大小，用于日志
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }
}

/// 单次执行的结果，只用于日志与告警，不持久化
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_name: String,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    /// 实际发起的上传次数，归档失败时为 0
    pub attempts: u32,
    pub error: Option<BackupError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nightly() -> JobSpec {
        JobSpec {
            name: "nightly".to_string(),
            source_dir: PathBuf::from("/data"),
            remote_path: "/backups/".to_string(),
            schedule: CronSchedule::parse("0 2 * * *").unwrap(),
            retries: 3,
        }
    }

    #[test]
    fn test_artifact_file_name() {
        let at = Local.with_ymd_and_hms(2025, 7, 5, 2, 0, 9).unwrap();
        assert_eq!(
            nightly().artifact_file_name(&at),
            "nightly-20250705-020009.tar.gz"
        );
    }

    #[test]
    fn test_remote_file_path_joins_with_single_slash() {
        let job = nightly();
        assert_eq!(
            job.remote_file_path("nightly-20250705-020009.tar.gz"),
            "/backups/nightly-20250705-020009.tar.gz"
        );
    }
}
