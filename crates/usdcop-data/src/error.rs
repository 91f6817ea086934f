//! 데이터 모듈 오류 타입.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 원격 API가 2xx가 아닌 응답 또는 `status: "error"`를 반환
    #[error("Upstream error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    /// 과거 데이터를 어느 경로에서도 얻지 못함
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// 모든 활성 키가 일일 한도에 도달
    #[error("API quota exhausted for {exhausted} key(s), next reset at {next_reset_at}")]
    QuotaExhausted {
        exhausted: usize,
        next_reset_at: DateTime<Utc>,
    },

    /// 사용 가능한(활성) 키가 없음
    #[error("No API key available")]
    NoKeyAvailable,

    /// 잘못된 설정
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 네트워크/연결 오류
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 응답 파싱 오류
    #[error("Parse error: {0}")]
    Parse(String),

    /// 상태 영속화 오류
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 오브젝트 스토어 오류 (연결 외)
    #[error("Object store error: {0}")]
    ObjectStore(String),
}

impl DataError {
    /// 재시도 가능한 오류인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::Network(_) | DataError::Timeout(_) | DataError::QuotaExhausted { .. }
        )
    }

    /// 연결 수준의 실패인지 확인 (fallback 경로 선택에 사용).
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DataError::Network(_) | DataError::Timeout(_))
    }

    /// "빈 결과"로 취급해야 하는 오류인지 확인.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, DataError::DataUnavailable(_))
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            DataError::Network(err.to_string())
        } else if err.is_decode() {
            DataError::Parse(err.to_string())
        } else {
            DataError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Parse(err.to_string())
    }
}

impl From<usdcop_core::CoreError> for DataError {
    fn from(err: usdcop_core::CoreError) -> Self {
        match err {
            usdcop_core::CoreError::InvalidCandle(msg) => DataError::Parse(msg),
            other => DataError::InvalidConfiguration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
