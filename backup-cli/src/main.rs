use backup_cli::project_info::version_info;
use backup_cli::{Cli, ServiceApp, setup_logging};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 日志写盘线程的守卫，退出前释放以刷新缓冲
    let log_guard = setup_logging(cli.verbose);

    let outcome = run(&cli).await;
    if let Err(e) = &outcome {
        error!("❌ {:#}", e);
    }

    drop(log_guard);
    if outcome.is_err() {
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    info!("{} 启动，配置文件: {}", version_info::banner(), cli.config.display());
    let app = ServiceApp::new(&cli.config)?;
    app.run().await
}
