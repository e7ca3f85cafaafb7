pub mod archive;
pub mod config;
pub mod constants;
pub mod cron;
pub mod error;
pub mod job;
pub mod notifier;
pub mod runner;
pub mod scheduler;
pub mod uploader;
pub mod webdav;

#[cfg(test)]
mod testing;

pub use error::{BackupError, Result};
