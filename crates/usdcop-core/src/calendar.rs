//! 거래 시간 캘린더.
//!
//! 고정된 주간 스케줄과 타임존으로 정의된 거래 세션을 다룹니다.
//! 모든 함수는 순수 함수이며, 잘못된 스케줄은 생성 시점에
//! [`CoreError::InvalidConfiguration`]으로 거부됩니다.
//!
//! USD/COP 기본 세션: 월~금 08:00-12:55 COT (America/Bogota).

use crate::domain::Series;
use crate::error::{CoreError, CoreResult};
use crate::types::Timeframe;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// USD/COP 기본 세션 (월~금 08:00-12:55 America/Bogota).
pub static USDCOP_SESSION: LazyLock<SessionSpec> = LazyLock::new(SessionSpec::usdcop);

/// 주간 거래 세션 스펙.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// ISO 요일 (월=1 .. 일=7)
    weekdays: BTreeSet<u8>,
    /// 세션 시작 (현지 시각, 포함)
    start: NaiveTime,
    /// 세션 종료 (현지 시각, 포함)
    end: NaiveTime,
    /// 세션 타임존
    timezone: Tz,
}

impl SessionSpec {
    /// 검증을 거쳐 세션 스펙을 생성합니다.
    pub fn new(
        weekdays: impl IntoIterator<Item = u8>,
        start: NaiveTime,
        end: NaiveTime,
        timezone: Tz,
    ) -> CoreResult<Self> {
        let weekdays: BTreeSet<u8> = weekdays.into_iter().collect();
        if weekdays.is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "session must have at least one weekday".to_string(),
            ));
        }
        if let Some(bad) = weekdays.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(CoreError::InvalidConfiguration(format!(
                "weekday {} out of range 1..=7",
                bad
            )));
        }
        if start >= end {
            return Err(CoreError::InvalidConfiguration(format!(
                "session start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self {
            weekdays,
            start,
            end,
            timezone,
        })
    }

    /// 문자열 입력으로부터 세션 스펙을 생성합니다.
    ///
    /// 시간은 `HH:MM` 또는 `HH:MM:SS`, 타임존은 IANA 이름입니다.
    pub fn parse(weekdays: &[u8], start: &str, end: &str, timezone: &str) -> CoreResult<Self> {
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        let timezone: Tz = timezone.parse().map_err(|_| {
            CoreError::InvalidConfiguration(format!("unknown timezone: {}", timezone))
        })?;
        Self::new(weekdays.iter().copied(), start, end, timezone)
    }

    /// USD/COP 기본 세션.
    pub fn usdcop() -> Self {
        Self {
            weekdays: (1..=5).collect(),
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(12, 55, 0).unwrap_or(NaiveTime::MIN),
            timezone: chrono_tz::America::Bogota,
        }
    }

    pub fn weekdays(&self) -> &BTreeSet<u8> {
        &self.weekdays
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// `timestamp`가 세션 안에 있는지 확인합니다.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        is_in_session(timestamp, self)
    }

    /// 세션 하루 동안 생성되는 캔들 수.
    pub fn bars_per_day(&self, timeframe: Timeframe) -> usize {
        session_bars_per_day(self, timeframe)
    }
}

impl Default for SessionSpec {
    fn default() -> Self {
        Self::usdcop()
    }
}

/// `timestamp`가 세션 안에 있는지 확인합니다 (종료 시각 포함).
pub fn is_in_session(timestamp: DateTime<Utc>, spec: &SessionSpec) -> bool {
    let local = timestamp.with_timezone(&spec.timezone);
    let weekday = local.weekday().number_from_monday() as u8;
    if !spec.weekdays.contains(&weekday) {
        return false;
    }
    let time = local.time();
    time >= spec.start && time <= spec.end
}

/// `from` 이후(같은 시각 포함) 첫 세션 시작 시각.
pub fn next_session_start(from: DateTime<Utc>, spec: &SessionSpec) -> DateTime<Utc> {
    let local_date = from.with_timezone(&spec.timezone).date_naive();

    // 요일 집합이 비어있지 않으므로 8일 안에 반드시 후보가 있음
    for offset in 0..=7 {
        let date = local_date + Duration::days(offset);
        let weekday = date.weekday().number_from_monday() as u8;
        if !spec.weekdays.contains(&weekday) {
            continue;
        }
        let candidate = localize(spec.timezone, date.and_time(spec.start));
        if candidate >= from {
            return candidate;
        }
    }

    localize(
        spec.timezone,
        (local_date + Duration::days(7)).and_time(spec.start),
    )
}

/// 세션 하루 동안 생성되는 캔들 수 (최소 1).
pub fn session_bars_per_day(spec: &SessionSpec, timeframe: Timeframe) -> usize {
    if !timeframe.is_intraday() {
        return 1;
    }
    let span_secs = (spec.end - spec.start).num_seconds().max(0) as u64;
    (span_secs / timeframe.as_secs()) as usize + 1
}

/// 세션 밖의 캔들을 제거합니다.
pub fn filter_in_session(series: &Series, spec: &SessionSpec) -> Series {
    series
        .iter()
        .filter(|c| is_in_session(c.timestamp, spec))
        .cloned()
        .collect()
}

fn parse_time(s: &str) -> CoreResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| CoreError::InvalidConfiguration(format!("invalid session time: {}", s)))
}

/// 현지 시각을 UTC로 변환합니다. DST 공백 구간이면 한 시간 뒤로 밀어 해석합니다.
fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&naive),
        },
    }
}
