//! USD/COP 데이터 수집 및 정렬.
//!
//! 이 crate는 다음을 제공합니다:
//! - 일일 한도가 있는 API 키 로테이션 (사용량 스냅샷 영속화)
//! - TwelveData 원격 시세 게이트웨이 및 호출 모니터
//! - 과거 데이터 저장소 리더 (S3 호환 오브젝트 스토어 → 조회 API fallback)
//! - 데이터 품질 진단
//! - 과거/실시간 데이터 병합 및 갭 채우기
//! - 위 구성요소를 묶은 시장 데이터 서비스
//!
//! 어떤 경로에서도 대체(합성) 캔들을 만들지 않습니다. 데이터를 가져오지 못하면
//! 빈 결과를 반환하고 로그를 남깁니다.

pub mod aligner;
pub mod error;
pub mod gateway;
pub mod rotation;
pub mod service;
pub mod store;

pub use error::{DataError, Result};

pub use aligner::{merge, DataAligner};
pub use gateway::{
    ApiCallRecord, ApiMonitor, KeyCallStats, QuoteSource, SeriesSource, TwelveDataClient,
    UsageMonitor,
};
pub use rotation::{
    InMemoryKeyStore, JsonFileKeyStore, KeyLease, KeyRotationService, KeySnapshot,
    KeyStatePersistence, UsageStats,
};
pub use service::MarketDataService;
pub use store::{
    HistoricalStore, ObjectStore, QualityReport, QuerySpec, S3ObjectStore, StoreQueryApi,
};
