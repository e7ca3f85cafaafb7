use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};

/// 日志文件路径的环境变量，设置后日志写入该文件而非终端
pub const LOG_FILE_ENV: &str = "BACKUP_LOG_FILE";

/// # 日志初始化
///
/// - `-v, --verbose`：DEBUG 级别，否则 INFO
/// - `RUST_LOG`：覆盖默认级别，如 `RUST_LOG=backup_core::uploader=debug`
/// - `BACKUP_LOG_FILE`：追加写入日志文件，通过后台线程写盘
///
/// 返回的 [`WorkerGuard`] 必须持有到进程退出，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        match open_log_file(Path::new(&log_file)) {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .init();
                return Some(guard);
            }
            Err(e) => eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端"),
        }
    }

    // 常驻服务需要时间戳
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .compact()
        .init();
    None
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
