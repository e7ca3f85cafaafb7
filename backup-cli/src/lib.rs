// 私有模块声明
mod app;
mod cli;
mod utils;
pub mod project_info;

// 通过 pub use 精确控制对外暴露的接口
pub use app::ServiceApp;
pub use cli::Cli;
pub use utils::setup_logging;
