//! API 키 로테이션.

mod persistence;
mod service;

pub use persistence::{InMemoryKeyStore, JsonFileKeyStore, KeySnapshot, KeyStatePersistence, KeyUsageEntry};
pub use service::{KeyLease, KeyPool, KeyRotationService, KeyUsage, UsageStats};
