//! 单元测试共用的替身实现

use crate::error::{BackupError, Result};
use crate::notifier::{AlertMessage, AlertSink};
use crate::uploader::RemoteStore;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// 按脚本失败若干次后成功的远程存储
pub struct ScriptedStore {
    failures: u32,
    calls: AtomicU32,
    uploaded: Mutex<Vec<String>>,
}

impl ScriptedStore {
    /// 前 `failures` 次调用失败，之后成功
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(local_path.is_file(), "上传时本地归档必须存在");

        if call <= self.failures {
            return Err(BackupError::remote(format!("HTTP 503 (第 {call} 次)")));
        }
        self.uploaded.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }
}

/// 记录所有告警消息的告警通道
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<AlertMessage>>,
    fail: bool,
}

impl RecordingSink {
    /// 每次发送都失败的告警通道
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<AlertMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, message: &AlertMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(BackupError::alert("SMTP 连接被拒绝"));
        }
        Ok(())
    }
}
