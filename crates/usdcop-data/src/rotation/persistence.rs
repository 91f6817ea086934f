//! 키 사용량 스냅샷 영속화 포트.
//!
//! 서비스는 [`KeyStatePersistence`]만 알고, 저장 매체는 주입됩니다.

use crate::error::{DataError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// 키 하나의 사용량 기록.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsageEntry {
    /// 오늘 사용한 호출 수
    pub calls_today: u32,
    /// 마지막 리셋 시각
    pub last_reset: DateTime<Utc>,
    /// 활성 여부
    pub is_active: bool,
}

/// 키 로테이션 상태 스냅샷.
///
/// 엔트리는 설정된 키 순서와 위치로 대응됩니다. 비밀 값은 저장하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySnapshot {
    pub api_keys: Vec<KeyUsageEntry>,
    #[serde(default)]
    pub backup_keys: Vec<KeyUsageEntry>,
    pub current_key_index: usize,
    pub last_saved: DateTime<Utc>,
}

/// 스냅샷 저장소.
pub trait KeyStatePersistence: Send + Sync {
    /// 저장된 스냅샷을 읽습니다. 없으면 `None`.
    fn load(&self) -> Result<Option<KeySnapshot>>;

    /// 스냅샷을 저장합니다.
    fn save(&self, snapshot: &KeySnapshot) -> Result<()>;
}

/// JSON 파일 기반 저장소.
#[derive(Debug, Clone)]
pub struct JsonFileKeyStore {
    path: PathBuf,
}

impl JsonFileKeyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStatePersistence for JsonFileKeyStore {
    fn load(&self) -> Result<Option<KeySnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DataError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| DataError::Persistence(format!("corrupt key snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &KeySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DataError::Persistence(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;

        // 임시 파일에 쓴 뒤 교체
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| DataError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| DataError::Persistence(e.to_string()))?;
        Ok(())
    }
}

/// 메모리 저장소 (테스트 및 영속화가 필요 없는 호스트용).
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    snapshot: Mutex<Option<KeySnapshot>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 미리 채워진 스냅샷으로 생성합니다.
    pub fn with_snapshot(snapshot: KeySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    /// 마지막으로 저장된 스냅샷.
    pub fn snapshot(&self) -> Option<KeySnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KeyStatePersistence for InMemoryKeyStore {
    fn load(&self) -> Result<Option<KeySnapshot>> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &KeySnapshot) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}
