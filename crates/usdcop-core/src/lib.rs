//! # USDCOP Core
//!
//! USD/COP 데이터 엔진의 핵심 도메인 모델 및 인프라를 제공합니다.
//!
//! 이 크레이트는 엔진 전반에서 사용되는 기본 타입을 제공합니다:
//! - 캔들 및 시계열(`Series`) 타입
//! - 타임프레임 및 데이터 레이어 정의
//! - 거래 시간 캘린더
//! - 취소 가능한 예약 작업
//! - 설정 관리
//! - 로깅 인프라

pub mod calendar;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod schedule;
pub mod types;

pub use calendar::*;
pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use schedule::*;
pub use types::*;
