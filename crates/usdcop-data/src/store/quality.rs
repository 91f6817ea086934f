//! 과거 데이터 품질 진단.
//!
//! 관측용 지표이며 조회 결과를 바꾸지 않습니다.

use super::QuerySpec;
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::BTreeSet;
use usdcop_core::{is_in_session, Candle, Series, SessionSpec};

/// 이상치 판정 기준 (표준편차 배수).
const OUTLIER_SIGMA: f64 = 4.0;

/// 세션 내 연속 캔들 사이의 누락 구간.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    /// 누락 직전 캔들 시각
    pub from: DateTime<Utc>,
    /// 누락 직후 캔들 시각
    pub to: DateTime<Utc>,
    /// 누락된 캔들 수
    pub missing_bars: usize,
}

/// 품질 리포트.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// 세션 기대 캔들 대비 실제 캔들 비율 (%)
    pub completeness_pct: f64,
    pub gaps: Vec<Gap>,
    /// 중복 제거 전 중복 타임스탬프 수
    pub duplicate_count: usize,
    /// 수익률이 4σ를 넘는 캔들 수
    pub outlier_count: usize,
    /// 중복 제거 후 세션 내 캔들 수
    pub total_points: usize,
    /// 범위 내 세션 기대 캔들 수
    pub expected_points: usize,
}

impl QualityReport {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty() && self.total_points >= self.expected_points
    }
}

/// 중복 제거 전 레코드로 품질을 평가합니다.
pub fn assess_quality(raw: &[Candle], spec: &QuerySpec, session: &SessionSpec) -> QualityReport {
    let distinct: BTreeSet<DateTime<Utc>> = raw.iter().map(|c| c.timestamp).collect();
    let duplicate_count = raw.len() - distinct.len();

    let series = Series::from_candles(
        raw.iter()
            .filter(|c| is_in_session(c.timestamp, session))
            .cloned(),
    );

    let bars_per_day = session.bars_per_day(spec.timeframe);
    let expected_points = spec
        .dates()
        .filter(|d| {
            session
                .weekdays()
                .contains(&(d.weekday().number_from_monday() as u8))
        })
        .count()
        * bars_per_day;

    let total_points = series.len();
    let completeness_pct = if expected_points == 0 {
        100.0
    } else {
        (total_points as f64 * 100.0 / expected_points as f64).min(100.0)
    };

    QualityReport {
        completeness_pct,
        gaps: find_gaps(&series, spec, session),
        duplicate_count,
        outlier_count: count_outliers(&series),
        total_points,
        expected_points,
    }
}

/// 같은 세션일 안에서 한 타임프레임보다 긴 간격을 찾습니다.
fn find_gaps(series: &Series, spec: &QuerySpec, session: &SessionSpec) -> Vec<Gap> {
    let step = spec.timeframe.as_chrono();
    let tz = session.timezone();

    series
        .as_slice()
        .windows(2)
        .filter_map(|w| {
            let (a, b) = (w[0].timestamp, w[1].timestamp);
            let same_day = a.with_timezone(&tz).date_naive() == b.with_timezone(&tz).date_naive();
            let diff = b - a;
            if !same_day || diff <= step {
                return None;
            }
            let missing = (diff.num_seconds() / step.num_seconds()).saturating_sub(1);
            Some(Gap {
                from: a,
                to: b,
                missing_bars: missing.max(1) as usize,
            })
        })
        .collect()
}

/// 종가 기준 수익률이 평균에서 4σ 이상 벗어난 캔들 수.
fn count_outliers(series: &Series) -> usize {
    let returns: Vec<f64> = series
        .as_slice()
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].close.to_f64()?;
            let curr = w[1].close.to_f64()?;
            (prev > 0.0).then(|| (curr - prev) / prev)
        })
        .collect();

    if returns.len() < 2 {
        return 0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0;
    }

    returns
        .iter()
        .filter(|r| ((*r - mean) / std_dev).abs() > OUTLIER_SIGMA)
        .count()
}
