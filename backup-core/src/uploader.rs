use crate::constants::upload::backoff_delay;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 远程文件存储
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 把本地文件完整写入远程路径，每次调用都重新打开本地文件
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;
}

/// 带有限重试和指数退避的上传器
#[derive(Clone)]
pub struct RemoteUploader {
    store: Arc<dyn RemoteStore>,
}

impl RemoteUploader {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// 上传文件，最多尝试 `max_attempts` 次（小于 1 时按 1 次处理）
    ///
    /// 第 i 次（从 0 开始）失败后等待 2^i 秒再重试，最后一次失败后不再等待。
    /// 成功时返回实际尝试次数；全部失败时返回包装了最后一次错误的 [`BackupError::Upload`]。
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        max_attempts: u32,
    ) -> Result<u32> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            info!(
                remote = remote_path,
                "正在上传 (第 {}/{} 次)...",
                attempt + 1,
                max_attempts
            );

            match self.store.put_file(local_path, remote_path).await {
                Ok(()) => {
                    info!(remote = remote_path, attempts = attempt + 1, "上传成功");
                    return Ok(attempt + 1);
                }
                Err(e) if attempt + 1 >= max_attempts => {
                    warn!(error = %e, "上传失败，已达到最大尝试次数");
                    return Err(BackupError::upload_exhausted(max_attempts, e));
                }
                Err(e) => {
                    let wait = backoff_delay(attempt);
                    warn!(error = %e, "上传失败，{}秒后重试", wait.as_secs());
                    tokio::time::sleep(wait).await;
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn local_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job-20250101-020000.tar.gz");
        std::fs::write(&path, b"archive").unwrap();
        (dir, path)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt_after_backoff() {
        let (_dir, path) = local_file();
        let store = Arc::new(ScriptedStore::failing_first(2));
        let uploader = RemoteUploader::new(store.clone());

        let started = Instant::now();
        let attempts = uploader.upload(&path, "/backups/a.tar.gz", 3).await.unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(store.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2));
        assert_eq!(store.uploaded(), vec!["/backups/a.tar.gz".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_each_attempt() {
        let (_dir, path) = local_file();
        let store = Arc::new(ScriptedStore::failing_first(4));
        let uploader = RemoteUploader::new(store.clone());

        let started = Instant::now();
        let attempts = uploader.upload(&path, "/b/x", 5).await.unwrap();

        assert_eq!(attempts, 5);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_has_no_trailing_sleep() {
        let (_dir, path) = local_file();
        let store = Arc::new(ScriptedStore::always_failing());
        let uploader = RemoteUploader::new(store.clone());

        let started = Instant::now();
        let err = uploader.upload(&path, "/b/x", 3).await.unwrap_err();

        assert_eq!(store.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2));
        match err {
            BackupError::Upload { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("第 3 次"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_stops_immediately() {
        let (_dir, path) = local_file();
        let store = Arc::new(ScriptedStore::failing_first(0));
        let uploader = RemoteUploader::new(store.clone());

        let started = Instant::now();
        assert_eq!(uploader.upload(&path, "/b/x", 5).await.unwrap(), 1);
        assert_eq!(store.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_means_one() {
        let (_dir, path) = local_file();
        let store = Arc::new(ScriptedStore::always_failing());
        let uploader = RemoteUploader::new(store.clone());

        let err = uploader.upload(&path, "/b/x", 0).await.unwrap_err();
        assert_eq!(store.calls(), 1);
        assert!(matches!(err, BackupError::Upload { attempts: 1, .. }));
    }
}
