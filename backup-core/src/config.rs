use crate::constants::archive::{DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
use crate::constants::config::{WRITE_PROBE_FILE, keys};
use crate::constants::{smtp, upload};
use crate::cron::CronSchedule;
use crate::error::{BackupError, Result, ValidationReport};
use crate::job::JobSpec;
use chrono::Local;
use lettre::message::Mailbox;
use reqwest::Url;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 校验通过后的应用配置，启动时构建一次，之后只读
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub webdav: WebdavConfig,
    pub cache_dir: PathBuf,
    pub compression_level: u32,
    /// 未配置 SMTP 主机时为 None，即关闭告警
    pub smtp: Option<SmtpConfig>,
    pub jobs: Vec<JobSpec>,
}

/// WebDAV 连接配置
#[derive(Clone)]
pub struct WebdavConfig {
    pub url: Url,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for WebdavConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebdavConfig")
            .field("url", &self.url.as_str())
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// 邮件告警配置
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("from", &self.from.to_string())
            .field("to", &self.to.len())
            .finish()
    }
}

impl AppConfig {
    /// 从指定文件加载并校验配置
    ///
    /// 以 `.toml` 结尾的文件按 TOML 解析，其余按 `.env` 键值文件解析。
    /// 所有校验问题汇总为一个多行错误返回。
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BackupError::config(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }

        let mut report = ValidationReport::new();
        let raw = if is_toml(path) {
            let content = fs::read_to_string(path).map_err(|e| {
                BackupError::config(format!("读取配置文件 {} 失败: {e}", path.display()))
            })?;
            RawConfig::from_toml_str(&content)?
        } else {
            let mut values = HashMap::new();
            for item in dotenvy::from_path_iter(path)? {
                let (key, value) = item?;
                values.insert(key, value);
            }
            RawConfig::from_env_map(&values, &mut report)
        };

        tracing::info!(path = %path.display(), "已读取配置文件");
        raw.validate(report)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// 未经校验的原始配置
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub webdav: RawWebdav,
    pub cache_dir: String,
    pub compression_level: Option<u32>,
    pub smtp: Option<RawSmtp>,
    pub backups: Vec<RawBackup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawWebdav {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSmtp {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub from: Option<String>,
    pub to: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawBackup {
    pub name: String,
    pub source: String,
    pub remote_path: String,
    pub frequency: String,
    pub retries: Option<u32>,
}

impl RawConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 从 `.env` 风格的键值对构建原始配置，数值解析失败记入 `report`
    pub fn from_env_map(values: &HashMap<String, String>, report: &mut ValidationReport) -> Self {
        let get = |key: &str| values.get(key).map(|v| v.trim().to_string()).unwrap_or_default();

        let backup_count: usize = parse_optional(values, keys::BACKUP_COUNT, report).unwrap_or(0);
        let backups = (1..=backup_count)
            .map(|index| {
                let prefix = keys::backup_prefix(index);
                let key = |suffix: &str| format!("{prefix}{suffix}");
                RawBackup {
                    name: get(&key("NAME")),
                    source: get(&key("SOURCE")),
                    remote_path: get(&key("REMOTE_PATH")),
                    frequency: get(&key("FREQUENCY")),
                    retries: parse_optional(values, &key("RETRIES"), report),
                }
            })
            .collect();

        let from = get(keys::SMTP_FROM);
        let smtp = RawSmtp {
            host: get(keys::SMTP_HOST),
            port: parse_optional(values, keys::SMTP_PORT, report),
            user: get(keys::SMTP_USER),
            password: get(keys::SMTP_PASSWORD),
            from: (!from.is_empty()).then_some(from),
            to: get(keys::SMTP_TO)
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        };

        Self {
            webdav: RawWebdav {
                url: get(keys::WEBDAV_URL),
                user: get(keys::WEBDAV_USER),
                password: get(keys::WEBDAV_PASSWORD),
            },
            cache_dir: get(keys::CACHE_DIR),
            compression_level: parse_optional(values, keys::COMPRESSION_LEVEL, report),
            smtp: Some(smtp),
            backups,
        }
    }

    /// 校验并转换为 [`AppConfig`]，任何一项不通过都不会返回部分配置
    pub fn validate(self, mut report: ValidationReport) -> Result<AppConfig> {
        let webdav = validate_webdav(self.webdav, &mut report);
        let cache_dir = validate_cache_dir(&self.cache_dir, &mut report);

        let compression_level = self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        if compression_level > MAX_COMPRESSION_LEVEL {
            report.push(format!(
                "{} 必须在 0-{MAX_COMPRESSION_LEVEL} 之间，当前为 {compression_level}",
                keys::COMPRESSION_LEVEL
            ));
        }

        let smtp = match self.smtp {
            Some(raw) if !raw.host.trim().is_empty() => validate_smtp(raw, &mut report),
            _ => None,
        };

        if self.backups.is_empty() {
            report.push(format!("{} 至少需要配置一个备份任务", keys::BACKUP_COUNT));
        }

        let mut seen = HashSet::new();
        let jobs: Vec<Option<JobSpec>> = self
            .backups
            .into_iter()
            .enumerate()
            .map(|(i, raw)| validate_backup(i + 1, raw, &mut seen, &mut report))
            .collect();

        report.into_result()?;

        match (webdav, cache_dir) {
            (Some(webdav), Some(cache_dir)) => Ok(AppConfig {
                webdav,
                cache_dir,
                compression_level,
                smtp,
                jobs: jobs.into_iter().flatten().collect(),
            }),
            _ => Err(BackupError::config("配置校验状态不一致")),
        }
    }
}

fn parse_optional<T>(
    values: &HashMap<String, String>,
    key: &str,
    report: &mut ValidationReport,
) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = values.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            report.push(format!("{key} '{raw}' 无效: {e}"));
            None
        }
    }
}

fn validate_webdav(raw: RawWebdav, report: &mut ValidationReport) -> Option<WebdavConfig> {
    let url = if raw.url.is_empty() {
        report.push(format!("{} 为必填项", keys::WEBDAV_URL));
        None
    } else {
        match Url::parse(&raw.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
            Ok(url) => {
                report.push(format!(
                    "{} '{}' 必须使用 http 或 https，当前为 {}",
                    keys::WEBDAV_URL,
                    raw.url,
                    url.scheme()
                ));
                None
            }
            Err(e) => {
                report.push(format!("{} '{}' 无效: {e}", keys::WEBDAV_URL, raw.url));
                None
            }
        }
    };

    if raw.user.is_empty() {
        report.push(format!("{} 为必填项", keys::WEBDAV_USER));
    }
    if raw.password.is_empty() {
        report.push(format!("{} 为必填项", keys::WEBDAV_PASSWORD));
    }

    let url = url?;
    if raw.user.is_empty() || raw.password.is_empty() {
        return None;
    }
    Some(WebdavConfig {
        url,
        user: raw.user,
        password: raw.password,
    })
}

fn validate_cache_dir(raw: &str, report: &mut ValidationReport) -> Option<PathBuf> {
    if raw.is_empty() {
        report.push(format!("{} 为必填项", keys::CACHE_DIR));
        return None;
    }

    let path = PathBuf::from(raw);
    if !path.is_dir() {
        report.push(format!("{} '{raw}' 不存在或不是目录", keys::CACHE_DIR));
        return None;
    }
    if !dir_writable(&path) {
        report.push(format!("{} '{raw}' 不可写", keys::CACHE_DIR));
        return None;
    }
    Some(path)
}

/// 写入并删除探测文件来判断目录是否可写
fn dir_writable(path: &Path) -> bool {
    let probe = path.join(WRITE_PROBE_FILE);
    if fs::write(&probe, b"test").is_err() {
        return false;
    }
    let _ = fs::remove_file(&probe);
    true
}

fn validate_smtp(raw: RawSmtp, report: &mut ValidationReport) -> Option<SmtpConfig> {
    let mut valid = true;

    if raw.to.is_empty() {
        report.push(format!("配置了 SMTP 时 {} 为必填项", keys::SMTP_TO));
        valid = false;
    }
    let mut to = Vec::with_capacity(raw.to.len());
    for address in &raw.to {
        match address.parse::<Mailbox>() {
            Ok(mailbox) => to.push(mailbox),
            Err(e) => {
                report.push(format!("{} 中的地址 '{address}' 无效: {e}", keys::SMTP_TO));
                valid = false;
            }
        }
    }

    let sender = raw.from.clone().unwrap_or_else(|| raw.user.clone());
    let from = if sender.is_empty() {
        report.push(format!(
            "配置了 SMTP 时 {} 或 {} 为必填项",
            keys::SMTP_FROM,
            keys::SMTP_USER
        ));
        None
    } else {
        match sender.parse::<Mailbox>() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                report.push(format!("发件人地址 '{sender}' 无效: {e}"));
                None
            }
        }
    };

    let from = from?;
    if !valid {
        return None;
    }
    Some(SmtpConfig {
        host: raw.host.trim().to_string(),
        port: raw.port.unwrap_or(smtp::DEFAULT_PORT),
        user: raw.user,
        password: raw.password,
        from,
        to,
    })
}

fn validate_backup(
    index: usize,
    raw: RawBackup,
    seen: &mut HashSet<String>,
    report: &mut ValidationReport,
) -> Option<JobSpec> {
    let label = if raw.name.is_empty() {
        format!("BACKUP_{index}")
    } else {
        format!("BACKUP_{index} [{}]", raw.name)
    };
    let mut valid = true;

    if raw.name.is_empty() {
        report.push(format!("{label}.NAME 为必填项"));
        valid = false;
    } else if raw.name.contains(['/', '\\']) || raw.name == "." || raw.name == ".." {
        // 名称会成为归档文件名的一部分
        report.push(format!(
            "{label}.NAME '{}' 不能包含路径分隔符，也不能是 '.' 或 '..'",
            raw.name
        ));
        valid = false;
    } else if !seen.insert(raw.name.clone()) {
        report.push(format!("{label}.NAME '{}' 与其他任务重复", raw.name));
        valid = false;
    }

    let source_dir = PathBuf::from(&raw.source);
    if raw.source.is_empty() {
        report.push(format!("{label}.SOURCE 为必填项"));
        valid = false;
    } else if !source_dir.is_dir() {
        report.push(format!("{label}.SOURCE '{}' 不存在或不是目录", raw.source));
        valid = false;
    }

    if raw.remote_path.is_empty() {
        report.push(format!("{label}.REMOTE_PATH 为必填项"));
        valid = false;
    }

    let retries = raw.retries.unwrap_or(upload::DEFAULT_RETRIES);
    if retries == 0 {
        report.push(format!("{label}.RETRIES 必须大于 0"));
        valid = false;
    }

    let schedule = match CronSchedule::parse(&raw.frequency) {
        Ok(schedule) if schedule.next_fire(&Local::now()).is_none() => {
            report.push(format!(
                "{label}.FREQUENCY '{}' 永远不会触发",
                raw.frequency
            ));
            None
        }
        Ok(schedule) => Some(schedule),
        Err(e) => {
            report.push(format!("{label}.FREQUENCY '{}' 无效: {e}", raw.frequency));
            None
        }
    };

    let schedule = schedule?;
    if !valid {
        return None;
    }
    Some(JobSpec {
        name: raw.name,
        source_dir,
        remote_path: raw.remote_path,
        schedule,
        retries,
    })
}
