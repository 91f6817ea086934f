//! 도메인 모델.
//!
//! - `Candle` - OHLCV 캔들과 출처 태그
//! - `Series` - 정렬/중복 제거된 캔들 시계열

pub mod candle;
pub mod series;

pub use candle::*;
pub use series::*;
