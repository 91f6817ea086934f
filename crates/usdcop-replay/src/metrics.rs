//! 리플레이 관측 지표.

use serde::Serialize;
use usdcop_core::Candle;

/// 버퍼 점유 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferHealth {
    /// 70% 미만
    Healthy,
    /// 90% 미만
    Warning,
    Critical,
}

impl BufferHealth {
    /// 점유율(%)로 상태를 판정합니다.
    pub fn from_utilization(pct: f64) -> Self {
        if pct < 70.0 {
            BufferHealth::Healthy
        } else if pct < 90.0 {
            BufferHealth::Warning
        } else {
            BufferHealth::Critical
        }
    }
}

/// 리플레이 지표 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayMetrics {
    /// 로드된 전체 캔들 수
    pub total_points: usize,
    /// 틱으로 전진한 누적 캔들 수
    pub processed_points: usize,
    /// `cursor / max_buffer_size` (%)
    pub buffer_utilization_pct: f64,
    /// 보관 중인 prefix의 추정 메모리
    pub estimated_memory_bytes: usize,
    /// 구독자 오류 누적 수
    pub error_count: usize,
    pub buffer_health: BufferHealth,
}

impl ReplayMetrics {
    pub(crate) fn compute(
        total_points: usize,
        processed_points: usize,
        cursor: usize,
        max_buffer_size: usize,
        error_count: usize,
    ) -> Self {
        let buffer_utilization_pct = if max_buffer_size == 0 {
            100.0
        } else {
            (cursor as f64 * 100.0 / max_buffer_size as f64).min(100.0)
        };
        Self {
            total_points,
            processed_points,
            buffer_utilization_pct,
            estimated_memory_bytes: cursor * std::mem::size_of::<Candle>(),
            error_count,
            buffer_health: BufferHealth::from_utilization(buffer_utilization_pct),
        }
    }
}
