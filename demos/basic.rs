//! Basic usage example for the rollmetrics crate.

use rollmetrics::{CounterBuilder, HitRatioBuilder, MockTicker, RetentionPolicy, SharedCounter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== Basic Rolling Aggregates Example ===\n");

    // Example 1: Retention strategies side by side
    retention_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Smooth decay of a rolling window
    decay_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Hit ratio with periodic reset
    hit_ratio_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Many writers
    concurrent_example();
}

fn retention_example() {
    println!("1. Retention Strategies:");

    let ticker = MockTicker::new(0);
    let policies = [
        ("uniform", RetentionPolicy::uniform()),
        ("reset on snapshot", RetentionPolicy::reset_on_snapshot()),
        (
            "reset every 10s",
            RetentionPolicy::reset_periodically(Duration::from_secs(10)),
        ),
        (
            "last 10s in 5 chunks",
            RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(10), 5),
        ),
    ];

    for (name, policy) in policies {
        let counter = CounterBuilder::new(policy.with_ticker(ticker.clone())).build();
        counter.add(10);

        let first = counter.get_sum();
        let second = counter.get_sum();
        println!("   {:<22} first read = {:>3}, second read = {:>3}", name, first, second);
    }
}

fn decay_example() {
    println!("2. Rolling Window Decay:");

    let ticker = MockTicker::new(0);
    let counter = CounterBuilder::new(
        RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(2), 2)
            .with_ticker(ticker.clone()),
    )
    .build();

    counter.add(100);
    println!("   Added 100 at t=0 to a 2s window of 2 chunks");

    for t in [0, 1000, 2000, 2200, 2600, 2980, 3000] {
        ticker.set(t);
        println!("   t={:>5}ms  sum={:>3}", t, counter.get_sum());
    }
}

fn hit_ratio_example() {
    println!("3. Periodic Hit Ratio:");

    let ticker = MockTicker::new(0);
    let ratio = HitRatioBuilder::new(
        RetentionPolicy::reset_periodically(Duration::from_secs(1)).with_ticker(ticker.clone()),
    )
    .build();

    ratio.update(1, 1).unwrap();
    println!("   1 hit of 1       ratio = {:.2}", ratio.get_ratio());
    ratio.update(0, 1).unwrap();
    println!("   0 hits of 1      ratio = {:.2}", ratio.get_ratio());

    ticker.advance(Duration::from_millis(1001));
    println!("   after the reset  ratio = {}", ratio.get_ratio());

    ratio.update(6, 10).unwrap();
    println!("   6 hits of 10     ratio = {:.2}", ratio.get_ratio());

    match ratio.update(5, 3) {
        Ok(()) => println!("   unexpected success"),
        Err(e) => println!("   ❌ rejected: {}", e),
    }
}

fn concurrent_example() {
    println!("4. Concurrent Writers:");

    let counter: SharedCounter = Arc::from(
        CounterBuilder::new(RetentionPolicy::reset_periodically_by_chunks(
            Duration::from_secs(60),
            6,
        ))
        .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..100_000 {
                    counter.add(1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!("   8 threads × 100000 adds = {}", counter.get_sum());
}
