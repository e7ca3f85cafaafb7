//! # cron 表达式
//!
//! 标准 5 字段格式：
//! ```text
//! ┌───────────── 分钟 (0-59)
//! │ ┌───────────── 小时 (0-23)
//! │ │ ┌───────────── 日 (1-31)
//! │ │ │ ┌───────────── 月 (1-12 或 JAN-DEC)
//! │ │ │ │ ┌───────────── 星期 (0-7 或 SUN-SAT，0 和 7 都表示周日)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! 支持 `*`、`?`、列表 `a,b`、范围 `a-b`、步长 `*/n`、`a-b/n`、`a/n`，
//! 以及 `@yearly` `@annually` `@monthly` `@weekly` `@daily` `@midnight` `@hourly`。
//! 日与星期同时受限时，任一匹配即可（与传统 cron 一致）。

use crate::constants::scheduler::MAX_LOOKAHEAD_YEARS;
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("表达式为空")]
    Empty,

    #[error("需要 5 个字段，实际为 {0} 个")]
    FieldCount(usize),

    #[error("不支持的描述符: {0}")]
    UnknownDescriptor(String),

    #[error("{field} 字段的值无效: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} 字段的值 {value} 超出范围 [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} 字段的范围无效: {start}-{end}")]
    InvalidRange {
        field: &'static str,
        start: u32,
        end: u32,
    },

    #[error("{field} 字段的步长无效: '{step}'")]
    InvalidStep { field: &'static str, step: String },
}

/// 单个字段的取值约束
struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    aliases: &'static [&'static str],
}

const MINUTE: FieldKind = FieldKind {
    name: "分钟",
    min: 0,
    max: 59,
    aliases: &[],
};

const HOUR: FieldKind = FieldKind {
    name: "小时",
    min: 0,
    max: 23,
    aliases: &[],
};

const DAY_OF_MONTH: FieldKind = FieldKind {
    name: "日",
    min: 1,
    max: 31,
    aliases: &[],
};

// 别名下标即取值，月份从 1 开始，故首位留空
const MONTH: FieldKind = FieldKind {
    name: "月",
    min: 1,
    max: 12,
    aliases: &[
        "", "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
};

const DAY_OF_WEEK: FieldKind = FieldKind {
    name: "星期",
    min: 0,
    max: 7,
    aliases: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
};

/// 解析后的单个字段
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
    /// 字段为 `*` 或 `?`（无步长）
    any: bool,
}

impl CronField {
    fn parse(expr: &str, kind: &FieldKind) -> Result<Self, CronError> {
        let mut field = CronField {
            values: BTreeSet::new(),
            any: false,
        };
        for part in expr.split(',') {
            field.parse_part(part.trim(), kind)?;
        }
        Ok(field)
    }

    fn parse_part(&mut self, part: &str, kind: &FieldKind) -> Result<(), CronError> {
        if part.is_empty() {
            return Err(CronError::InvalidValue {
                field: kind.name,
                value: part.to_string(),
            });
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step = step_str
                    .parse::<u32>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| CronError::InvalidStep {
                        field: kind.name,
                        step: step_str.to_string(),
                    })?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            if step.is_none_or(|step| step == 1) {
                self.any = true;
            }
            (kind.min, kind.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let start = parse_value(lo, kind)?;
            let end = parse_value(hi, kind)?;
            if start > end {
                return Err(CronError::InvalidRange {
                    field: kind.name,
                    start,
                    end,
                });
            }
            (start, end)
        } else {
            let start = parse_value(range, kind)?;
            // `a/n` 表示从 a 到最大值，按步长 n
            let end = if step.is_some() { kind.max } else { start };
            (start, end)
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            self.values.insert(value);
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
        Ok(())
    }

    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

fn parse_value(token: &str, kind: &FieldKind) -> Result<u32, CronError> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => kind
            .aliases
            .iter()
            .position(|alias| !alias.is_empty() && alias.eq_ignore_ascii_case(token))
            .map(|index| index as u32)
            .ok_or_else(|| CronError::InvalidValue {
                field: kind.name,
                value: token.to_string(),
            })?,
    };

    if value < kind.min || value > kind.max {
        return Err(CronError::OutOfRange {
            field: kind.name,
            value,
            min: kind.min,
            max: kind.max,
        });
    }
    Ok(value)
}

/// 预定义描述符对应的 5 字段表达式
fn expand_descriptor(expr: &str) -> Result<&'static str, CronError> {
    match expr.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownDescriptor(expr.to_string())),
    }
}

/// 解析后的 cron 调度表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(CronError::Empty);
        }

        let fields_expr = if trimmed.starts_with('@') {
            expand_descriptor(trimmed)?
        } else {
            trimmed
        };

        let parts: Vec<&str> = fields_expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let mut day_of_week = CronField::parse(parts[4], &DAY_OF_WEEK)?;
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }

        Ok(Self {
            expr: trimmed.to_string(),
            minute: CronField::parse(parts[0], &MINUTE)?,
            hour: CronField::parse(parts[1], &HOUR)?,
            day_of_month: CronField::parse(parts[2], &DAY_OF_MONTH)?,
            month: CronField::parse(parts[3], &MONTH)?,
            day_of_week,
        })
    }

    /// 原始表达式
    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.day_of_month.any || self.day_of_week.any {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// 严格晚于 `after` 的下一个匹配时刻（分钟精度）
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut current = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let last_year = after.year() + MAX_LOOKAHEAD_YEARS;

        while current.year() <= last_year {
            let date = current.date();

            if !self.month.contains(date.month()) {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                current = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.day_matches(date) {
                current = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.hour.contains(current.hour()) {
                current = date.and_hms_opt(current.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }

            if !self.minute.contains(current.minute()) {
                current += Duration::minutes(1);
                continue;
            }

            return Some(current);
        }

        None
    }

    /// 在给定时区下计算下一次触发时间
    ///
    /// 夏令时跳过的本地时刻不会触发；重复出现的本地时刻只在较早的一次触发，
    /// 若较早的一次已经过去则跳过该时刻。
    pub fn next_fire<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut cursor = after.naive_local();
        loop {
            let candidate = self.next_after(cursor)?;
            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) if dt > *after => return Some(dt),
                LocalResult::Ambiguous(earliest, _) if earliest > *after => return Some(earliest),
                // 已经过去的重复时刻或被跳过的时刻
                _ => cursor = candidate,
            }
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        assert_eq!(CronSchedule::parse("   "), Err(CronError::Empty));
        assert_eq!(CronSchedule::parse("* * * *"), Err(CronError::FieldCount(4)));
        assert_eq!(
            CronSchedule::parse("* * * * * *"),
            Err(CronError::FieldCount(6))
        );
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(CronError::OutOfRange { value: 60, .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* 5-2 * * *"),
            Err(CronError::InvalidRange { start: 5, end: 2, .. })
        ));
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::InvalidStep { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("not a cron expr at"),
            Err(CronError::InvalidValue { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("@every 5m"),
            Err(CronError::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn test_daily_at_two() {
        let schedule = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 3, 10, 1, 30)),
            Some(at(2025, 3, 10, 2, 0))
        );
        // 恰好处于触发点时取下一次
        assert_eq!(
            schedule.next_after(at(2025, 3, 10, 2, 0)),
            Some(at(2025, 3, 11, 2, 0))
        );
        // 跨年
        assert_eq!(
            schedule.next_after(at(2025, 12, 31, 23, 59)),
            Some(at(2026, 1, 1, 2, 0))
        );
    }

    #[test]
    fn test_steps_lists_and_ranges() {
        let schedule = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
        // 2025-03-08 是周六
        assert_eq!(
            schedule.next_after(at(2025, 3, 8, 10, 0)),
            Some(at(2025, 3, 10, 9, 0))
        );
        assert_eq!(
            schedule.next_after(at(2025, 3, 10, 9, 0)),
            Some(at(2025, 3, 10, 9, 15))
        );

        let schedule = CronSchedule::parse("5,35 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 1, 1, 0, 10)),
            Some(at(2025, 1, 1, 0, 35))
        );

        let schedule = CronSchedule::parse("10/20 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 1, 1, 0, 31)),
            Some(at(2025, 1, 1, 0, 50))
        );
    }

    #[test]
    fn test_names_and_sunday_as_seven() {
        let by_name = CronSchedule::parse("0 3 * jan-mar SUN").unwrap();
        let by_number = CronSchedule::parse("0 3 * 1-3 7").unwrap();
        let start = at(2025, 1, 1, 0, 0);
        // 2025-01-05 是周日
        assert_eq!(by_name.next_after(start), Some(at(2025, 1, 5, 3, 0)));
        assert_eq!(by_number.next_after(start), by_name.next_after(start));
    }

    #[test]
    fn test_descriptors() {
        let daily = CronSchedule::parse("@daily").unwrap();
        assert_eq!(daily.expr(), "@daily");
        assert_eq!(
            daily.next_after(at(2025, 6, 1, 12, 0)),
            Some(at(2025, 6, 2, 0, 0))
        );

        let hourly = CronSchedule::parse("@HOURLY").unwrap();
        assert_eq!(
            hourly.next_after(at(2025, 6, 1, 12, 1)),
            Some(at(2025, 6, 1, 13, 0))
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 每月 13 日或每个周五
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        // 2025-06-06 是周五，早于 13 日
        assert_eq!(
            schedule.next_after(at(2025, 6, 1, 0, 0)),
            Some(at(2025, 6, 6, 0, 0))
        );
        assert_eq!(
            schedule.next_after(at(2025, 6, 12, 0, 0)),
            Some(at(2025, 6, 13, 0, 0))
        );

        // 星期为 * 时只看日期
        let schedule = CronSchedule::parse("0 0 13 * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 6, 1, 0, 0)),
            Some(at(2025, 6, 13, 0, 0))
        );
    }

    #[test]
    fn test_leap_day_and_impossible_date() {
        let leap = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            leap.next_after(at(2025, 3, 1, 0, 0)),
            Some(at(2028, 2, 29, 0, 0))
        );

        let never = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(never.next_after(at(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_next_fire_in_utc() {
        let schedule: CronSchedule = "30 4 * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 5, 0, 0).unwrap();
        let next = schedule.next_fire(&now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 5, 2, 4, 30, 0).unwrap());
        assert_eq!(schedule.to_string(), "30 4 * * *");
    }

    #[test]
    fn test_huge_step_does_not_overflow() {
        let schedule = CronSchedule::parse("59/4294967295 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 1, 1, 0, 0)),
            Some(at(2025, 1, 1, 0, 59))
        );
        assert_eq!(
            schedule.next_after(at(2025, 1, 1, 0, 59)),
            Some(at(2025, 1, 1, 1, 59))
        );

        let schedule = CronSchedule::parse("*/4294967295 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2025, 1, 1, 0, 0)),
            Some(at(2025, 1, 1, 1, 0))
        );
    }

    /// 2025-11-02 06:00 UTC 从 UTC-4 切换到 UTC-5，本地 01:00-02:00 出现两次
    #[derive(Debug, Clone, Copy)]
    struct FallBack;

    impl FallBack {
        fn switch() -> NaiveDateTime {
            at(2025, 11, 2, 6, 0)
        }

        fn summer() -> FixedOffset {
            FixedOffset::west_opt(4 * 3600).unwrap()
        }

        fn winter() -> FixedOffset {
            FixedOffset::west_opt(5 * 3600).unwrap()
        }
    }

    impl TimeZone for FallBack {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            FallBack
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let as_summer = *local + Duration::hours(4) < Self::switch();
            let as_winter = *local + Duration::hours(5) >= Self::switch();
            match (as_summer, as_winter) {
                (true, true) => LocalResult::Ambiguous(Self::summer(), Self::winter()),
                (true, false) => LocalResult::Single(Self::summer()),
                (false, true) => LocalResult::Single(Self::winter()),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::switch() {
                Self::summer()
            } else {
                Self::winter()
            }
        }
    }

    #[test]
    fn test_next_fire_in_repeated_hour() {
        let schedule = CronSchedule::parse("30 1 * * *").unwrap();

        // 第一次经过 01:05，取较早的 01:30
        let first_pass = FallBack.from_utc_datetime(&at(2025, 11, 2, 5, 5));
        let next = schedule.next_fire(&first_pass).unwrap();
        assert_eq!(next.naive_utc(), at(2025, 11, 2, 5, 30));

        // 第二次经过 01:05 时较早的 01:30 已过去，不能立即触发
        let second_pass = FallBack.from_utc_datetime(&at(2025, 11, 2, 6, 5));
        assert_eq!(second_pass.naive_local(), at(2025, 11, 2, 1, 5));
        let next = schedule.next_fire(&second_pass).unwrap();
        assert!(next > second_pass);
        assert_eq!(next.naive_local(), at(2025, 11, 3, 1, 30));
    }
}
