//! USD/COP 마켓 리플레이.
//!
//! 과거 시계열을 누적 prefix로 한 캔들씩 재생하고, 끝에 도달하면 라이브 모드로 전환합니다.
//!
//! - [`ReplayEngine`]: 시간을 주입받는 동기 상태 기계
//! - [`ReplayDriver`]: 엔진을 소유하고 프레임 간격으로 구동하는 tokio 태스크
//! - [`ReplayMetrics`]: 처리량과 버퍼 점유 지표

pub mod driver;
pub mod engine;
pub mod error;
pub mod metrics;

pub use driver::{ReplayDriver, ReplayHandle};
pub use engine::{
    ReplayConfig, ReplayEngine, ReplayMode, ReplayStatus, ReplayUpdate, SubscriberError,
    SubscriberResult, SubscriptionId, TickOutcome, SPEED_ALLOW_LIST,
};
pub use error::{ReplayError, Result};
pub use metrics::{BufferHealth, ReplayMetrics};
