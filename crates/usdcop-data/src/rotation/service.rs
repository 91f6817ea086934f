//! 일일 한도가 있는 API 키 로테이션 서비스.
//!
//! # 선택 규칙
//!
//! ```text
//! next_key(now)
//!     │
//!     ├─ 리셋 스윕 (UTC 자정을 넘긴 키는 0으로, 다시 활성화)
//!     │
//!     ├─ 기본 키: 마지막 선택 다음 위치부터 라운드 로빈
//!     │     active && calls < limit 인 첫 키
//!     │
//!     ├─ 예비 키: 같은 규칙
//!     │
//!     └─ 없음 → 모두 비활성: NoKeyAvailable
//!              그 외:         QuotaExhausted
//! ```
//!
//! 소진된 키를 "그래도" 반환하는 fallback은 없습니다. 호출자가 대기/저하/알림을 결정합니다.
//!
//! 모든 상태 변경은 하나의 `Mutex` 안에서 일어나며(단일 writer), 변경 후 스냅샷을
//! 영속화 포트에 저장합니다. 저장 실패는 로그만 남기고 메모리 상태를 유지합니다.

use super::persistence::{KeySnapshot, KeyStatePersistence, KeyUsageEntry};
use crate::error::{DataError, Result};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use usdcop_core::{duration_until_next_utc_midnight, ScheduledTask, TwelveDataConfig};

/// 키가 속한 풀.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPool {
    Primary,
    Backup,
}

/// 한도가 있는 API 자격증명.
#[derive(Debug)]
struct ApiKeyCredential {
    id: String,
    secret: SecretString,
    calls_used_today: u32,
    daily_limit: u32,
    active: bool,
    last_reset: DateTime<Utc>,
}

impl ApiKeyCredential {
    fn new(id: String, secret: SecretString, daily_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            secret,
            calls_used_today: 0,
            daily_limit,
            active: true,
            last_reset: day_start(now),
        }
    }

    fn is_available(&self) -> bool {
        self.active && self.calls_used_today < self.daily_limit
    }

    fn is_exhausted(&self) -> bool {
        self.calls_used_today >= self.daily_limit
    }

    fn needs_reset(&self, now: DateTime<Utc>) -> bool {
        now - self.last_reset >= Duration::hours(24)
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.calls_used_today = 0;
        self.active = true;
        self.last_reset = day_start(now);
    }

    fn apply(&mut self, entry: &KeyUsageEntry) {
        self.calls_used_today = entry.calls_today;
        self.active = entry.is_active;
        self.last_reset = entry.last_reset;
    }

    fn to_entry(&self) -> KeyUsageEntry {
        KeyUsageEntry {
            calls_today: self.calls_used_today,
            last_reset: self.last_reset,
            is_active: self.active,
        }
    }
}

/// 요청 하나에 대여된 키.
#[derive(Debug)]
pub struct KeyLease {
    /// 키 식별자 (`primary-0`, `backup-1`, ...)
    pub key_id: String,
    /// 비밀 값
    pub secret: SecretString,
    /// 이 요청을 포함한 오늘의 호출 수
    pub calls_today: u32,
    /// 일일 한도
    pub daily_limit: u32,
    /// 소속 풀
    pub pool: KeyPool,
}

/// 키별 사용량.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyUsage {
    pub key_id: String,
    pub pool: KeyPool,
    pub calls_today: u32,
    pub daily_limit: u32,
    pub active: bool,
}

/// 관측용 사용량 스냅샷.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_capacity: u64,
    pub exhausted_count: usize,
    pub inactive_count: usize,
    pub next_reset_at: DateTime<Utc>,
    pub per_key: Vec<KeyUsage>,
}

#[derive(Debug)]
struct RotationState {
    primary: Vec<ApiKeyCredential>,
    backup: Vec<ApiKeyCredential>,
    last_primary: Option<usize>,
    last_backup: Option<usize>,
}

impl RotationState {
    fn credentials(&self) -> impl Iterator<Item = (&ApiKeyCredential, KeyPool)> {
        self.primary
            .iter()
            .map(|c| (c, KeyPool::Primary))
            .chain(self.backup.iter().map(|c| (c, KeyPool::Backup)))
    }

    fn credentials_mut(&mut self) -> impl Iterator<Item = &mut ApiKeyCredential> {
        self.primary.iter_mut().chain(self.backup.iter_mut())
    }

    fn find_mut(&mut self, key_id: &str) -> Option<&mut ApiKeyCredential> {
        self.credentials_mut().find(|c| c.id == key_id)
    }

    fn next_reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.credentials()
            .map(|(c, _)| c.last_reset + Duration::hours(24))
            .min()
            .unwrap_or_else(|| day_start(now) + Duration::hours(24))
    }

    fn snapshot(&self, now: DateTime<Utc>) -> KeySnapshot {
        KeySnapshot {
            api_keys: self.primary.iter().map(ApiKeyCredential::to_entry).collect(),
            backup_keys: self.backup.iter().map(ApiKeyCredential::to_entry).collect(),
            current_key_index: self.last_primary.unwrap_or(0),
            last_saved: now,
        }
    }

    fn restore(&mut self, snapshot: &KeySnapshot) {
        for (cred, entry) in self.primary.iter_mut().zip(&snapshot.api_keys) {
            cred.apply(entry);
        }
        for (cred, entry) in self.backup.iter_mut().zip(&snapshot.backup_keys) {
            cred.apply(entry);
        }
        if snapshot.current_key_index < self.primary.len() {
            self.last_primary = Some(snapshot.current_key_index);
        }
    }
}

/// API 키 로테이션 서비스.
///
/// 호스트의 composition root에서 한 번 생성해 `Arc`로 공유합니다.
pub struct KeyRotationService {
    state: Mutex<RotationState>,
    persistence: Arc<dyn KeyStatePersistence>,
}

impl KeyRotationService {
    /// 새 서비스를 생성하고 저장된 스냅샷이 있으면 복원합니다.
    pub fn new(
        primary: Vec<SecretString>,
        backup: Vec<SecretString>,
        daily_limit: u32,
        persistence: Arc<dyn KeyStatePersistence>,
    ) -> Self {
        Self::new_at(primary, backup, daily_limit, persistence, Utc::now())
    }

    /// 기준 시각을 지정해 생성합니다.
    pub fn new_at(
        primary: Vec<SecretString>,
        backup: Vec<SecretString>,
        daily_limit: u32,
        persistence: Arc<dyn KeyStatePersistence>,
        now: DateTime<Utc>,
    ) -> Self {
        let primary = primary
            .into_iter()
            .enumerate()
            .map(|(i, s)| ApiKeyCredential::new(format!("primary-{}", i), s, daily_limit, now))
            .collect();
        let backup = backup
            .into_iter()
            .enumerate()
            .map(|(i, s)| ApiKeyCredential::new(format!("backup-{}", i), s, daily_limit, now))
            .collect();

        let mut state = RotationState {
            primary,
            backup,
            last_primary: None,
            last_backup: None,
        };

        match persistence.load() {
            Ok(Some(snapshot)) => {
                state.restore(&snapshot);
                info!(
                    keys = snapshot.api_keys.len(),
                    backup_keys = snapshot.backup_keys.len(),
                    last_saved = %snapshot.last_saved,
                    "API 키 사용량 스냅샷 복원"
                );
            }
            Ok(None) => debug!("저장된 API 키 스냅샷 없음"),
            Err(e) => warn!(error = %e, "API 키 스냅샷 로드 실패, 초기 상태로 시작"),
        }

        Self {
            state: Mutex::new(state),
            persistence,
        }
    }

    /// 설정에서 생성합니다.
    pub fn from_config(config: &TwelveDataConfig, persistence: Arc<dyn KeyStatePersistence>) -> Self {
        let to_secrets = |keys: &[String]| {
            keys.iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| SecretString::from(k.trim()))
                .collect::<Vec<_>>()
        };
        Self::new(
            to_secrets(&config.keys),
            to_secrets(&config.backup_keys),
            config.daily_limit,
            persistence,
        )
    }

    /// 다음 사용할 키를 대여합니다.
    pub fn next_key(&self) -> Result<KeyLease> {
        self.next_key_at(Utc::now())
    }

    /// 기준 시각 `now`로 다음 키를 대여합니다.
    pub fn next_key_at(&self, now: DateTime<Utc>) -> Result<KeyLease> {
        let mut state = self.lock();
        Self::sweep_locked(&mut state, now);

        let lease = if let Some(idx) = pick(&state.primary, state.last_primary) {
            state.last_primary = Some(idx);
            Some(lease_from(&mut state.primary[idx], KeyPool::Primary))
        } else if let Some(idx) = pick(&state.backup, state.last_backup) {
            state.last_backup = Some(idx);
            warn!(key_id = %state.backup[idx].id, "기본 키 소진, 예비 키 사용");
            Some(lease_from(&mut state.backup[idx], KeyPool::Backup))
        } else {
            None
        };

        match lease {
            Some(lease) => {
                debug!(
                    key_id = %lease.key_id,
                    calls_today = lease.calls_today,
                    daily_limit = lease.daily_limit,
                    "API 키 대여"
                );
                self.persist_locked(&state, now);
                Ok(lease)
            }
            None => {
                let any_active = state.credentials().any(|(c, _)| c.active);
                if !any_active {
                    warn!("활성 API 키 없음");
                    return Err(DataError::NoKeyAvailable);
                }
                let exhausted = state.credentials().filter(|(c, _)| c.is_exhausted()).count();
                let next_reset_at = state.next_reset_at(now);
                warn!(exhausted, next_reset_at = %next_reset_at, "모든 API 키 한도 소진");
                Err(DataError::QuotaExhausted {
                    exhausted,
                    next_reset_at,
                })
            }
        }
    }

    /// 키를 비활성화합니다. 다음 리셋까지 다시 활성화되지 않습니다.
    pub fn mark_failed(&self, key_id: &str) -> bool {
        let mut state = self.lock();
        let found = match state.find_mut(key_id) {
            Some(cred) => {
                cred.active = false;
                true
            }
            None => false,
        };
        if found {
            warn!(key_id, "API 키 비활성화");
            self.persist_locked(&state, Utc::now());
        }
        found
    }

    /// 현재 사용량 스냅샷.
    pub fn usage_stats(&self) -> UsageStats {
        self.usage_stats_at(Utc::now())
    }

    pub fn usage_stats_at(&self, now: DateTime<Utc>) -> UsageStats {
        let state = self.lock();
        let per_key: Vec<KeyUsage> = state
            .credentials()
            .map(|(c, pool)| KeyUsage {
                key_id: c.id.clone(),
                pool,
                calls_today: c.calls_used_today,
                daily_limit: c.daily_limit,
                active: c.active,
            })
            .collect();

        UsageStats {
            total_calls: per_key.iter().map(|k| k.calls_today as u64).sum(),
            total_capacity: per_key.iter().map(|k| k.daily_limit as u64).sum(),
            exhausted_count: per_key.iter().filter(|k| k.calls_today >= k.daily_limit).count(),
            inactive_count: per_key.iter().filter(|k| !k.active).count(),
            next_reset_at: state.next_reset_at(now),
            per_key,
        }
    }

    /// 24시간이 지난 키를 리셋합니다. 리셋된 키 수를 반환합니다.
    pub fn reset_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let count = Self::sweep_locked(&mut state, now);
        if count > 0 {
            self.persist_locked(&state, now);
        }
        count
    }

    /// 매 UTC 자정에 리셋 스윕을 실행하는 예약 작업을 시작합니다.
    pub fn spawn_reset_timer(self: &Arc<Self>) -> ScheduledTask {
        self.spawn_reset_timer_with(Utc::now)
    }

    /// `clock`을 기준으로 자정 리셋 타이머를 시작합니다. 회차마다 다음 자정을 다시 계산합니다.
    pub fn spawn_reset_timer_with<C>(self: &Arc<Self>, clock: C) -> ScheduledTask
    where
        C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        let service = Arc::clone(self);
        let clock = Arc::new(clock);
        let delay_clock = Arc::clone(&clock);
        ScheduledTask::spawn_rescheduling(
            "api-key-reset",
            move || duration_until_next_utc_midnight(delay_clock()),
            move || {
                let service = Arc::clone(&service);
                let now = clock();
                async move {
                    let reset = service.reset_sweep(now);
                    info!(reset, %now, "API 키 일일 리셋 실행");
                }
            },
        )
    }

    /// 키 수 (기본 + 예비).
    pub fn key_count(&self) -> usize {
        let state = self.lock();
        state.primary.len() + state.backup.len()
    }

    fn sweep_locked(state: &mut RotationState, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for cred in state.credentials_mut() {
            if cred.needs_reset(now) {
                cred.reset(now);
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "API 키 사용량 리셋");
        }
        count
    }

    fn persist_locked(&self, state: &RotationState, now: DateTime<Utc>) {
        if let Err(e) = self.persistence.save(&state.snapshot(now)) {
            warn!(error = %e, "API 키 스냅샷 저장 실패 (메모리 상태 유지)");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `last` 다음 위치부터 라운드 로빈으로 사용 가능한 첫 키.
fn pick(pool: &[ApiKeyCredential], last: Option<usize>) -> Option<usize> {
    let n = pool.len();
    if n == 0 {
        return None;
    }
    let start = last.map(|i| (i + 1) % n).unwrap_or(0);
    (0..n)
        .map(|offset| (start + offset) % n)
        .find(|&i| pool[i].is_available())
}

fn lease_from(cred: &mut ApiKeyCredential, pool: KeyPool) -> KeyLease {
    cred.calls_used_today += 1;
    KeyLease {
        key_id: cred.id.clone(),
        secret: SecretString::from(cred.secret.expose_secret()),
        calls_today: cred.calls_used_today,
        daily_limit: cred.daily_limit,
        pool,
    }
}

/// 해당 시각이 속한 UTC 날짜의 00:00.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}
