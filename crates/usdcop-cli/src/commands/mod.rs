//! CLI 명령어 구현 모듈.

pub mod keys;
pub mod quality;
pub mod quote;
pub mod replay;
pub mod series;
pub mod session;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

/// 날짜 문자열 파싱 (YYYY-MM-DD).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format: {}. Use YYYY-MM-DD", s))
}

/// 조회 기간 파싱. 시작일이 종료일보다 늦으면 오류입니다.
pub fn parse_range(from: &str, to: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = parse_date(from)?;
    let end = parse_date(to)?;
    if start > end {
        bail!("Start date must be before end date");
    }
    Ok((start, end))
}

/// RFC 3339 시각 파싱.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}. Use RFC 3339 (e.g. 2024-03-05T13:00:00Z)", s))
}
