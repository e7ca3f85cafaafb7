/// 归档相关常量
pub mod archive {
    /// 归档文件扩展名
    pub const FILE_EXTENSION: &str = "tar.gz";

    /// 文件名中的时间戳格式（秒级，本地时间）
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

    /// 默认 gzip 压缩级别 (0-9)
    pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

    /// 最大 gzip 压缩级别
    pub const MAX_COMPRESSION_LEVEL: u32 = 9;
}

/// 上传相关常量
pub mod upload {
    use std::time::Duration;

    /// 默认上传尝试次数
    pub const DEFAULT_RETRIES: u32 = 3;

    /// HTTP 请求超时（大文件上传需要较长时间）
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

    /// 连接超时
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// 第 `attempt` 次（从 0 开始）失败后的等待时间：2^attempt 秒
    pub fn backoff_delay(attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt.min(63))
    }
}

/// 邮件告警相关常量
pub mod smtp {
    /// 默认 SMTP 提交端口（STARTTLS）
    pub const DEFAULT_PORT: u16 = 587;

    /// 隐式 TLS 端口
    pub const IMPLICIT_TLS_PORT: u16 = 465;

    /// 告警邮件主题前缀
    pub const SUBJECT_PREFIX: &str = "备份失败";
}

/// 配置相关常量
pub mod config {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = ".env";

    /// 缓存目录可写性探测文件名
    pub const WRITE_PROBE_FILE: &str = ".testwrite";

    /// 环境变量键名
    pub mod keys {
        pub const WEBDAV_URL: &str = "WEBDAV_URL";
        pub const WEBDAV_USER: &str = "WEBDAV_USER";
        pub const WEBDAV_PASSWORD: &str = "WEBDAV_PASSWORD";
        pub const CACHE_DIR: &str = "CACHE_DIR";
        pub const COMPRESSION_LEVEL: &str = "COMPRESSION_LEVEL";
        pub const SMTP_HOST: &str = "SMTP_HOST";
        pub const SMTP_PORT: &str = "SMTP_PORT";
        pub const SMTP_USER: &str = "SMTP_USER";
        pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
        pub const SMTP_FROM: &str = "SMTP_FROM";
        pub const SMTP_TO: &str = "SMTP_TO";
        pub const BACKUP_COUNT: &str = "BACKUP_COUNT";

        /// 第 `index` 个备份任务（从 1 开始）的键名前缀
        pub fn backup_prefix(index: usize) -> String {
            format!("BACKUP_{index}_")
        }
    }
}

/// 调度相关常量
pub mod scheduler {
    use std::time::Duration;

    /// 触发器单次最长睡眠时间，到期后重新对照系统时钟
    pub const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60);

    /// 优雅关闭时等待进行中任务的默认超时
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

    /// 查找下一次触发时间的最大搜索范围（年）
    pub const MAX_LOOKAHEAD_YEARS: i32 = 5;
}
