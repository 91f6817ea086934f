//! 리플레이 엔진 속성 테스트.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use usdcop_core::{Candle, CandleSource, Series};
use usdcop_replay::{ReplayConfig, ReplayEngine, ReplayMode, ReplayUpdate, TickOutcome};

fn series_from_offsets(offsets: &[i64]) -> Series {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();
    Series::from_candles(offsets.iter().map(|m| {
        let p = Decimal::from(4000 + m);
        Candle::new(
            t0 + ChronoDuration::minutes(*m),
            p,
            p,
            p,
            p,
            Decimal::ZERO,
            CandleSource::HistoricalStore,
        )
        .unwrap()
    }))
}

fn engine(display_window: usize) -> ReplayEngine {
    ReplayEngine::new(ReplayConfig {
        base_interval: Duration::from_millis(100),
        display_window,
        metrics_every: 10,
        auto_switch_to_live: false,
        live_transition_delay: Duration::from_millis(0),
        max_buffer_size: 1_000,
    })
}

fn recording(engine: &mut ReplayEngine) -> Arc<Mutex<Vec<ReplayUpdate>>> {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    engine.subscribe(move |u: &ReplayUpdate| {
        sink.lock().unwrap().push(u.clone());
        Ok(())
    });
    updates
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// 끝까지 재생하면 prefix 길이가 1부터 하나씩 늘어나며 각 갱신은 원본의 prefix입니다.
    #[test]
    fn prop_full_playback_emits_growing_prefixes(
        offsets in prop::collection::btree_set(0i64..5_000, 1..60),
        window in 1usize..80,
    ) {
        let offsets: Vec<i64> = offsets.into_iter().collect();
        let series = series_from_offsets(&offsets);
        let total = series.len();

        let mut engine = engine(window);
        let updates = recording(&mut engine);
        engine.load(series.clone());

        let t0 = Instant::now();
        engine.start(t0).unwrap();
        let mut step = 0u64;
        loop {
            step += 1;
            let outcome = engine.tick(t0 + Duration::from_millis(100 * step));
            if outcome == TickOutcome::Finished {
                break;
            }
            prop_assert!(step <= total as u64 + 1);
        }

        let updates = updates.lock().unwrap();
        prop_assert_eq!(updates.len(), total);
        for (i, update) in updates.iter().enumerate() {
            prop_assert_eq!(update.prefix_len, i + 1);
            prop_assert_eq!(update.total, total);
            let prefix = series.prefix(i + 1);
            let start = prefix.len().saturating_sub(window);
            prop_assert_eq!(&update.points[..], &prefix[start..]);
        }
        prop_assert_eq!(engine.mode(), ReplayMode::Stopped);
        prop_assert_eq!(engine.cursor(), total);
    }

    /// 탐색 결과는 목표 시각과의 거리가 최소인 가장 앞선 인덱스입니다.
    #[test]
    fn prop_seek_lands_on_nearest_point(
        offsets in prop::collection::btree_set(0i64..5_000, 1..60),
        target in -100i64..5_100,
    ) {
        let offsets: Vec<i64> = offsets.into_iter().collect();
        let series = series_from_offsets(&offsets);
        let mut engine = engine(100);
        engine.load(series);

        let index = engine
            .seek(Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap() + ChronoDuration::minutes(target))
            .unwrap();

        let distance = |m: i64| (m - target).abs();
        let best = offsets.iter().map(|m| distance(*m)).min().unwrap();
        let expected = offsets.iter().position(|m| distance(*m) == best).unwrap();
        prop_assert_eq!(index, expected);
        prop_assert_eq!(engine.cursor(), expected + 1);
        prop_assert_eq!(engine.mode(), ReplayMode::Stopped);
    }
}

#[test]
fn test_restart_issues_new_session() {
    let mut engine = engine(10);
    engine.load(series_from_offsets(&[0, 5, 10]));

    let t0 = Instant::now();
    engine.start(t0).unwrap();
    let first = engine.session_id();
    engine.stop();
    engine.start(t0).unwrap();

    assert_ne!(engine.session_id(), first);
    assert_eq!(engine.cursor(), 1);
}
