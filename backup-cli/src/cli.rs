use crate::project_info::{metadata, version_info};
use backup_core::constants::config::DEFAULT_CONFIG_PATH;
use clap::Parser;
use std::path::PathBuf;

/// WebDAV 定时备份服务
#[derive(Parser, Debug)]
#[command(name = metadata::display::BINARY_NAME)]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（.env 格式；以 .toml 结尾时按 TOML 解析）
    #[arg(short, long, env = "BACKUP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["dav-backup", "-c", "/etc/backup/.env", "-v"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/backup/.env"));
        assert!(cli.verbose);
    }
}
