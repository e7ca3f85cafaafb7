/// 项目元数据（自动从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    pub mod display {
        /// 可执行文件名称
        pub const BINARY_NAME: &str = "dav-backup";

        /// 命令行帮助中的详细描述
        pub const DESCRIPTION_LONG: &str = "按 cron 表达式定时把本地目录打包为 tar.gz，上传到 WebDAV 服务器，\
上传失败时按指数退避重试，最终失败时发送邮件告警";
    }
}

/// 版本信息
pub mod version_info {
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// 启动日志中使用的版本字符串
    pub fn banner() -> String {
        format!(
            "{} v{}",
            super::metadata::display::BINARY_NAME,
            CLI_VERSION
        )
    }
}
