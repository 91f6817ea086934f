//! 리플레이 오류 타입.

use thiserror::Error;

/// 리플레이 관련 오류.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// 시계열이 로드되지 않음
    #[error("No series loaded")]
    NotLoaded,

    /// 로드된 시계열이 비어있음
    #[error("Loaded series is empty")]
    EmptySeries,

    /// 라이브 모드가 아님
    #[error("Replay is not live (mode: {0})")]
    NotLive(String),

    /// 잘못된 설정 (예: 허용되지 않은 속도)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 드라이버 태스크가 종료됨
    #[error("Replay driver closed")]
    DriverClosed,
}

pub type Result<T> = std::result::Result<T, ReplayError>;
