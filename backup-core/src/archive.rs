use crate::constants::archive::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{BackupError, Result};
use crate::job::ArchiveArtifact;
use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tar::{Builder, Header, HeaderMode};
use walkdir::WalkDir;

/// 归档构建器：把一个目录树打包为单个 tar.gz 文件
#[derive(Debug, Clone, Copy)]
pub struct ArchiveBuilder {
    /// 压缩级别 (0-9)
    compression_level: u32,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl ArchiveBuilder {
    pub fn new(compression_level: u32) -> Self {
        Self { compression_level }
    }

    /// 在后台线程中构建归档，避免阻塞异步运行时
    pub async fn build(
        &self,
        source_dir: &Path,
        destination: &Path,
        created_at: DateTime<Local>,
    ) -> Result<ArchiveArtifact> {
        let builder = *self;
        let source_dir = source_dir.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            builder.build_blocking(&source_dir, &destination, created_at)
        })
        .await?
    }

    /// 同步构建归档
    ///
    /// 目标文件必须不存在；失败时目标路径上可能残留部分写入的文件，由调用方清理。
    pub fn build_blocking(
        &self,
        source_dir: &Path,
        destination: &Path,
        created_at: DateTime<Local>,
    ) -> Result<ArchiveArtifact> {
        if !source_dir.is_dir() {
            return Err(BackupError::archive(format!(
                "源目录不存在或不是目录: {}",
                source_dir.display()
            )));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(|e| {
                BackupError::archive(format!("无法创建归档文件 {}: {e}", destination.display()))
            })?;

        self.write_archive(source_dir, file)?;

        let size = std::fs::metadata(destination)
            .map_err(|e| BackupError::archive(format!("读取归档文件信息失败: {e}")))?
            .len();

        Ok(ArchiveArtifact {
            path: destination.to_path_buf(),
            size,
            created_at,
        })
    }

    fn write_archive(&self, source_dir: &Path, file: File) -> Result<()> {
        let encoder = GzEncoder::new(file, Compression::new(self.compression_level));
        let mut archive = Builder::new(encoder);
        archive.mode(HeaderMode::Complete);
        // 符号链接按链接本身记录，不跟随
        archive.follow_symlinks(false);

        for entry in WalkDir::new(source_dir).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| BackupError::archive(format!("遍历目录失败: {e}")))?;
            let path = entry.path();

            if is_socket(&entry) {
                tracing::warn!(path = %path.display(), "跳过无法归档的套接字文件");
                continue;
            }

            let archive_path = archive_name(source_dir, path)?;
            let file_type = entry.file_type();
            let appended = if file_type.is_file() || file_type.is_dir() || file_type.is_symlink() {
                archive.append_path_with_name(path, &archive_path)
            } else {
                // 管道、设备等特殊文件只记录头部
                let metadata = entry
                    .metadata()
                    .map_err(|e| BackupError::archive(format!("读取文件信息失败: {e}")))?;
                let mut header = Header::new_gnu();
                header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
                header.set_size(0);
                archive.append_data(&mut header, &archive_path, std::io::empty())
            };
            appended.map_err(|e| {
                BackupError::archive(format!("添加 {} 到归档失败: {e}", path.display()))
            })?;
        }

        let encoder = archive
            .into_inner()
            .map_err(|e| BackupError::archive(format!("完成归档失败: {e}")))?;
        let file = encoder
            .finish()
            .map_err(|e| BackupError::archive(format!("完成压缩失败: {e}")))?;
        file.sync_all()
            .map_err(|e| BackupError::archive(format!("写入归档文件失败: {e}")))?;

        Ok(())
    }
}

/// 归档内的相对路径，统一使用 `/` 分隔
fn archive_name(source_dir: &Path, path: &Path) -> Result<PathBuf> {
    let relative = path
        .strip_prefix(source_dir)
        .map_err(|e| BackupError::archive(format!("计算相对路径失败: {e}")))?;

    if cfg!(windows) {
        Ok(PathBuf::from(
            relative.display().to_string().replace('\\', "/"),
        ))
    } else {
        Ok(relative.to_path_buf())
    }
}

#[cfg(unix)]
fn is_socket(entry: &walkdir::DirEntry) -> bool {
    use std::os::unix::fs::FileTypeExt;
    entry.file_type().is_socket()
}

#[cfg(not(unix))]
fn is_socket(_entry: &walkdir::DirEntry) -> bool {
    false
}
