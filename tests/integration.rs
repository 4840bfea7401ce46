use rollmetrics::{
    CounterBuilder, HdrReservoir, Histogram, HitRatioBuilder, MockTicker, Position,
    RankingBuilder, RankingRecorder, RankingSettings, RetentionPolicy, SharedCounter,
    SharedHitRatio, SharedRanking, SingleThreadedRanking, ThreadExecutor, UpdateResult,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn all_policies(ticker: &MockTicker) -> Vec<RetentionPolicy> {
    vec![
        RetentionPolicy::uniform(),
        RetentionPolicy::reset_on_snapshot(),
        RetentionPolicy::reset_periodically(Duration::from_secs(60)),
        RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(60), 6),
    ]
    .into_iter()
    .map(|policy| policy.with_ticker(ticker.clone()))
    .collect()
}

#[test]
fn test_no_lost_counter_updates() {
    let ticker = MockTicker::new(0);

    for policy in all_policies(&ticker) {
        let counter: SharedCounter = Arc::from(CounterBuilder::new(policy).build());
        let mut handles = vec![];

        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    counter.add(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get_sum(), 80_000);
    }
}

#[test]
fn test_no_lost_hit_ratio_updates() {
    let ticker = MockTicker::new(0);

    for policy in all_policies(&ticker) {
        let ratio: SharedHitRatio = Arc::from(HitRatioBuilder::new(policy).build());
        let mut handles = vec![];

        for t in 0..4 {
            let ratio = ratio.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..5_000 {
                    if t % 2 == 0 {
                        ratio.increment_hit_count();
                    } else {
                        ratio.increment_miss_count();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ratio.get_ratio(), 0.5);
    }
}

#[test]
fn test_no_lost_ranking_updates() {
    let ticker = MockTicker::new(0);

    for policy in all_policies(&ticker) {
        let ranking: SharedRanking<u64> = Arc::from(
            RankingBuilder::<u64>::new(policy, 1000)
                .with_actor_pool_size(8)
                .build(),
        );
        let mut handles = vec![];

        for t in 0..4u64 {
            let ranking = ranking.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250u64 {
                    ranking.update(1 + (i % 7) as i64, t * 250 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let positions = ranking.get_positions_descending();
        let identities: HashSet<u64> = positions.iter().map(|p| p.identity).collect();
        assert_eq!(positions.len(), 1000);
        assert_eq!(identities.len(), 1000);
        assert!(positions.windows(2).all(|w| w[0].weight >= w[1].weight));
    }
}

#[test]
fn test_boundary_decay_determinism() {
    let ticker = MockTicker::new(0);
    let counter = CounterBuilder::new(
        RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(2), 2)
            .with_ticker(ticker.clone()),
    )
    .build();

    counter.add(100);
    assert_eq!(counter.get_sum(), 100);

    ticker.set(2600);
    assert_eq!(counter.get_sum(), 40);

    ticker.set(2980);
    assert_eq!(counter.get_sum(), 2);

    ticker.set(3000);
    assert_eq!(counter.get_sum(), 0);
}

#[test]
fn test_ranking_duplicate_collapsing() {
    let mut ranking = SingleThreadedRanking::new(1, 0);

    assert_eq!(ranking.update(5, "a"), UpdateResult::Inserted);
    assert_eq!(ranking.update(5, "a"), UpdateResult::SkippedDuplicate);
    assert_eq!(ranking.update(3, "a"), UpdateResult::SkippedDuplicate);
    assert_eq!(ranking.get_positions_descending(), vec![Position::new(5, "a")]);

    assert_eq!(ranking.update(8, "a"), UpdateResult::Inserted);
    assert_eq!(ranking.get_positions_descending(), vec![Position::new(8, "a")]);
}

#[test]
fn test_capacity_eviction() {
    let ranking = RankingBuilder::<u32>::new(RetentionPolicy::uniform(), 4).build();
    for id in 0..5u32 {
        ranking.update(10 + id as i64, id);
    }

    let identities: Vec<u32> = ranking
        .get_positions_descending()
        .into_iter()
        .map(|p| p.identity)
        .collect();
    assert_eq!(identities, vec![4, 3, 2, 1]);
}

#[test]
fn test_reset_on_snapshot_idempotence() {
    let counter = CounterBuilder::new(RetentionPolicy::reset_on_snapshot()).build();
    counter.add(3);
    counter.add(4);

    assert_eq!(counter.get_sum(), 7);
    assert_eq!(counter.get_sum(), 0);
}

#[test]
fn test_end_to_end_periodic_hit_ratio() {
    let ticker = MockTicker::new(0);
    let ratio = HitRatioBuilder::new(
        RetentionPolicy::reset_periodically(Duration::from_millis(1000)).with_ticker(ticker.clone()),
    )
    .build();

    ratio.update(1, 1).unwrap();
    assert_eq!(ratio.get_ratio(), 1.0);

    ratio.update(0, 1).unwrap();
    assert_eq!(ratio.get_ratio(), 0.5);

    ticker.set(1001);
    assert!(ratio.get_ratio().is_nan());

    ratio.update(6, 10).unwrap();
    assert!((ratio.get_ratio() - 0.6).abs() < 1e-9);
}

#[test]
fn test_chunk_history_extension() {
    let ticker = MockTicker::new(0);
    let ranking = RankingBuilder::<&str>::new(
        RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(6), 2)
            .with_ticker(ticker.clone()),
        10,
    )
    .build();

    ranking.update(1, "first chunk");
    ticker.set(3500);
    ranking.update(2, "second chunk");

    assert_eq!(
        ranking.get_positions_descending(),
        vec![Position::new(2, "second chunk"), Position::new(1, "first chunk")]
    );

    // Archived at 3000, kept one more interval
    ticker.set(5999);
    assert_eq!(ranking.get_positions_descending().len(), 2);

    ticker.set(6000);
    assert_eq!(
        ranking.get_positions_descending(),
        vec![Position::new(2, "second chunk")]
    );

    ticker.set(8999);
    assert_eq!(ranking.get_positions_descending().len(), 1);

    ticker.set(9000);
    assert!(ranking.get_positions_descending().is_empty());
}

#[test]
fn test_rolling_ranking_with_background_executor() {
    let ticker = MockTicker::new(0);
    let executor = Arc::new(ThreadExecutor::spawn("ranking-rotation").unwrap());
    let ranking = RankingBuilder::<u64>::new(
        RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(2), 2)
            .with_ticker(ticker.clone())
            .with_executor(executor.clone()),
        3,
    )
    .build();

    for step in 0..10u64 {
        ticker.set(step * 500);
        ranking.update(step as i64, step);
    }

    // At 4500 the window covers intervals 3 and 4
    let identities: Vec<u64> = ranking
        .get_positions_descending()
        .into_iter()
        .map(|p| p.identity)
        .collect();
    assert_eq!(identities, vec![9, 8, 7]);

    executor.shutdown();
}

#[test]
fn test_recorder_intervals_partition_updates() {
    let recorder = Arc::new(RankingRecorder::<u64>::new(RankingSettings::new(1000)).unwrap());
    let writer = {
        let recorder = recorder.clone();
        thread::spawn(move || {
            for id in 0..500u64 {
                recorder.update(1, id);
            }
        })
    };

    let mut seen = Vec::new();
    while !writer.is_finished() {
        seen.extend(
            recorder
                .get_interval_recorder(None)
                .get_positions_descending()
                .into_iter()
                .map(|p| p.identity),
        );
    }
    writer.join().unwrap();
    seen.extend(
        recorder
            .get_interval_recorder(None)
            .get_positions_descending()
            .into_iter()
            .map(|p| p.identity),
    );

    seen.sort_unstable();
    assert_eq!(seen, (0..500u64).collect::<Vec<_>>());
}

#[test]
fn test_cached_ranking_reads() {
    let ticker = MockTicker::new(0);
    let ranking = RankingBuilder::<char>::new(
        RetentionPolicy::reset_on_snapshot()
            .with_snapshot_caching_duration(Duration::from_secs(1))
            .with_ticker(ticker.clone()),
        5,
    )
    .build();

    ranking.update(1, 'a');
    assert_eq!(ranking.get_positions_descending(), vec![Position::new(1, 'a')]);
    // Served from the cache, so the reset does not show yet
    assert_eq!(ranking.get_positions_descending(), vec![Position::new(1, 'a')]);

    ticker.advance(Duration::from_secs(1));
    assert!(ranking.get_positions_descending().is_empty());
}

#[test]
fn test_ranking_actor_stats_under_load() {
    let ranking: SharedRanking<u64> = Arc::from(
        RankingBuilder::<u64>::new(RetentionPolicy::uniform(), 100)
            .with_actor_pool_size(2)
            .with_batch_size(16)
            .build(),
    );

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let ranking = ranking.clone();
            thread::spawn(move || {
                for i in 0..1_000u64 {
                    ranking.update((t * 1_000 + i) as i64, t * 1_000 + i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let top = ranking.get_positions_descending();
    assert_eq!(top.len(), 100);
    assert_eq!(top[0].identity, 7_999);

    let stats = ranking.actor_stats();
    println!("Ranking actor under load - {}", stats.summary());
    assert_eq!(stats.pool_size, 2);
    assert_eq!(stats.pending(), 0);
    assert!(stats.total_executed <= stats.total_submitted);
}

#[test]
fn test_histogram_collaborator() {
    let latencies = HdrReservoir::new(3_600_000, 3).unwrap();
    for ms in [5, 7, 9, 11, 1_000] {
        latencies.update(ms);
    }

    let snapshot = latencies.snapshot();
    assert_eq!(snapshot.sample_count, 5);
    assert_eq!(snapshot.min, 5);
    assert_eq!(snapshot.p50, 9);
    assert!(snapshot.max >= 1_000);
}
