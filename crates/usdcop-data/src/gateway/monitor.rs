//! 원격 API 호출 모니터.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// 원격 호출 한 건의 기록.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiCallRecord {
    pub key_id: String,
    pub endpoint: String,
    pub success: bool,
    pub latency_ms: u64,
    /// HTTP 상태 (응답을 받지 못했으면 `None`)
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// 호출 결과를 받는 모니터.
pub trait ApiMonitor: Send + Sync {
    fn record(&self, call: ApiCallRecord);
}

/// 키별 호출 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyCallStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub last_call: Option<DateTime<Utc>>,
    pub last_status: Option<u16>,
}

impl KeyCallStats {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// 평균 지연 (밀리초).
    pub fn avg_latency_ms(&self) -> Option<u64> {
        let total = self.total();
        (total > 0).then(|| self.total_latency_ms / total)
    }

    /// 성공률 (%).
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.success_count as f64 / total as f64 * 100.0)
    }
}

/// 메모리 집계 모니터.
#[derive(Debug, Default)]
pub struct UsageMonitor {
    stats: Mutex<HashMap<String, KeyCallStats>>,
}

impl UsageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 키별 통계 사본.
    pub fn snapshot(&self) -> HashMap<String, KeyCallStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats_for(&self, key_id: &str) -> Option<KeyCallStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key_id)
            .cloned()
    }
}

impl ApiMonitor for UsageMonitor {
    fn record(&self, call: ApiCallRecord) {
        if call.success {
            debug!(
                key_id = %call.key_id,
                endpoint = %call.endpoint,
                latency_ms = call.latency_ms,
                "API 호출 성공"
            );
        } else {
            warn!(
                key_id = %call.key_id,
                endpoint = %call.endpoint,
                latency_ms = call.latency_ms,
                status = ?call.status,
                "API 호출 실패"
            );
        }

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(call.key_id).or_default();
        if call.success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }
        entry.total_latency_ms += call.latency_ms;
        entry.last_call = Some(call.timestamp);
        entry.last_status = call.status;
    }
}
