//! Tracking the slowest queries of the last minute.
//!
//! Several worker threads report query latencies to a rolling ranking while
//! a reporter thread prints the current top 5.

use rollmetrics::{
    HdrReservoir, Histogram, RankingBuilder, RetentionPolicy, SharedRanking, ThreadExecutor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const QUERIES: [&str; 8] = [
    "SELECT * FROM orders WHERE customer_id = ?",
    "SELECT count(*) FROM events",
    "UPDATE inventory SET stock = stock - 1 WHERE sku = ?",
    "SELECT * FROM users WHERE email = ?",
    "DELETE FROM sessions WHERE expires_at < now()",
    "SELECT * FROM invoices ORDER BY created_at DESC LIMIT 100",
    "INSERT INTO audit_log VALUES (?, ?, ?)",
    "SELECT sum(amount) FROM payments GROUP BY merchant_id",
];

fn main() {
    println!("=== Slowest Queries Example ===\n");

    let executor = Arc::new(ThreadExecutor::spawn("ranking-rotation").expect("spawn executor"));
    let policy = RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(60), 6)
        .with_executor(executor.clone())
        .with_snapshot_caching_duration(Duration::from_millis(200));

    let slowest: SharedRanking<&'static str> = Arc::from(
        RankingBuilder::<&'static str>::new(policy, 5)
            .with_threshold(10)
            .build(),
    );
    let latencies = Arc::new(HdrReservoir::new(60_000, 3).expect("histogram bounds"));
    let running = Arc::new(AtomicBool::new(true));

    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let slowest = slowest.clone();
            let latencies = latencies.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut seed = worker * 7919 + 1;
                while running.load(Ordering::Relaxed) {
                    // xorshift keeps the demo free of extra dependencies
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;

                    let query = QUERIES[(seed % QUERIES.len() as u64) as usize];
                    let latency_ms = (seed % 500) as i64;

                    latencies.update(latency_ms);
                    slowest.update(latency_ms, query);
                    thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();

    for round in 1..=3 {
        thread::sleep(Duration::from_millis(500));
        println!("Round {}:", round);
        for (rank, position) in slowest.get_positions_descending().iter().enumerate() {
            println!("   {}. {:>4}ms  {}", rank + 1, position.weight, position.identity);
        }
        println!("   latencies: {}", latencies.snapshot());
        println!();
    }

    running.store(false, Ordering::Relaxed);
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = slowest.actor_stats();
    println!("Ranking health: {}", stats.health_status());
    println!("{}", stats.summary());
    if stats.is_under_pressure() {
        println!("⚠️  {}", stats.health_status().suggested_action());
    }

    executor.shutdown();
}
