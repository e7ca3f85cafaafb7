//! # WebDAV 客户端
//!
//! 只实现备份需要的两个操作：
//! - `PUT` 流式上传文件
//! - `MKCOL` 创建缺失的父目录（服务端对 `PUT` 返回 409 时）

use crate::config::WebdavConfig;
use crate::constants::upload::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::error::{BackupError, Result};
use crate::uploader::RemoteStore;
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Method, StatusCode, Url};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// WebDAV 远程存储
pub struct WebDavClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
}

impl WebDavClient {
    pub fn new(config: &WebdavConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// 把远程路径逐段追加到基础 URL 上，`collection` 为 true 时以 `/` 结尾
    pub fn url_for(&self, remote_path: &str, collection: bool) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                BackupError::remote(format!("WebDAV 基础地址无效: {}", self.base_url))
            })?;
            segments
                .pop_if_empty()
                .extend(remote_path.split('/').filter(|s| !s.is_empty()));
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    async fn put(&self, local_path: &Path, url: Url) -> Result<StatusCode> {
        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();

        let response = self
            .client
            .put(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        Ok(response.status())
    }

    /// 依次创建 `remote_path` 的所有父目录，已存在的目录会返回 405，视为成功
    async fn create_parent_collections(&self, remote_path: &str) -> Result<()> {
        let segments: Vec<&str> = remote_path.split('/').filter(|s| !s.is_empty()).collect();
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| BackupError::remote(format!("无效的 HTTP 方法: {e}")))?;

        for depth in 1..segments.len() {
            let url = self.url_for(&segments[..depth].join("/"), true)?;
            let status = self
                .client
                .request(mkcol.clone(), url.clone())
                .basic_auth(&self.user, Some(&self.password))
                .send()
                .await?
                .status();

            debug!(url = %url, status = %status, "MKCOL");
            if !(status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED) {
                return Err(BackupError::remote(format!(
                    "创建远程目录 {url} 失败: HTTP {status}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let url = self.url_for(remote_path, false)?;
        let mut status = self.put(local_path, url.clone()).await?;

        if status == StatusCode::CONFLICT {
            debug!(url = %url, "父目录不存在，尝试创建");
            self.create_parent_collections(remote_path).await?;
            status = self.put(local_path, url.clone()).await?;
        }

        if status.is_success() {
            Ok(())
        } else {
            Err(BackupError::remote(format!("上传到 {url} 失败: HTTP {status}")))
        }
    }
}
