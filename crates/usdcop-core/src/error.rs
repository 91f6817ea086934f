//! 코어 에러 타입.
//!
//! 도메인 타입 생성과 설정 검증 과정에서 발생하는 에러를 정의합니다.

use thiserror::Error;

/// 코어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 잘못된 설정 (세션 스펙, 재생 속도 등)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// OHLCV 불변 조건을 위반한 캔들
    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    /// 설정 로드 에러
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// 코어 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// 설정 관련 에러인지 확인합니다.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CoreError::InvalidConfiguration(_) | CoreError::Config(_))
    }
}
