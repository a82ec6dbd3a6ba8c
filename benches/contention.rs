use std::sync::Arc;
use std::time::{Duration, Instant};

use seatlock::booking::BookingEngine;
use seatlock::driver::{Scenario, Simulation, TrialReport};
use seatlock::store::{InMemoryStore, LockStrategy, ResourceStore};

const FLIGHT: &str = "BENCH-1";

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn latencies(report: &TrialReport) -> Vec<Duration> {
    report
        .records
        .iter()
        .map(|r| Duration::from_secs_f64(r.elapsed_ms / 1000.0))
        .collect()
}

async fn setup(seats: usize, actors: usize) -> (InMemoryStore, Simulation) {
    let store = InMemoryStore::new();
    store.seed_flight(FLIGHT, seats).await.expect("seed failed");
    let engine = BookingEngine::new(Arc::new(store.clone()));
    (store, Simulation::new(engine, actors))
}

async fn phase_exact(strategy: LockStrategy, actors: usize, rounds: usize) {
    let (store, sim) = setup(1, actors).await;
    let seat = store.find_seat(FLIGHT, "1A").await.unwrap().expect("seat 1A");
    let scenario = Scenario::Exact {
        resource_id: seat.id,
        strategy,
    };

    let mut all = Vec::with_capacity(actors * rounds);
    let start = Instant::now();
    for _ in 0..rounds {
        let report = sim.run_trial(&scenario).await.expect("trial failed");
        assert_eq!(report.tally.booked, 1, "exactly one booking per round");
        all.extend(latencies(&report));
        sim.reset_flight(FLIGHT).await.unwrap();
    }
    let elapsed = start.elapsed();
    let ops = (actors * rounds) as f64 / elapsed.as_secs_f64();
    println!(
        "  {rounds} rounds x {actors} actors in {:.2}s = {ops:.0} attempts/sec",
        elapsed.as_secs_f64()
    );
    print_latency("attempt latency", &mut all);
}

async fn phase_any(seats: usize, actors: usize, rounds: usize) {
    let (_store, sim) = setup(seats, actors).await;
    let scenario = Scenario::AnyAvailable {
        flight_id: FLIGHT.into(),
    };

    let mut all = Vec::with_capacity(actors * rounds);
    let mut booked = 0;
    let start = Instant::now();
    for _ in 0..rounds {
        let report = sim.run_trial(&scenario).await.expect("trial failed");
        assert!(!report.has_double_booking());
        booked += report.tally.booked;
        all.extend(latencies(&report));
        sim.reset_flight(FLIGHT).await.unwrap();
    }
    let elapsed = start.elapsed();
    println!(
        "  {rounds} rounds, {seats} seats, {actors} actors: {booked} booked in {:.2}s",
        elapsed.as_secs_f64()
    );
    print_latency("attempt latency", &mut all);
}

#[tokio::main]
async fn main() {
    let rounds: usize = std::env::var("SEATLOCK_BENCH_ROUNDS")
        .unwrap_or_else(|_| "200".into())
        .parse()
        .expect("invalid SEATLOCK_BENCH_ROUNDS");

    println!("=== seatlock contention benchmark ===");
    println!("rounds: {rounds}\n");

    println!("[phase 1] exact seat, blocking");
    phase_exact(LockStrategy::Blocking, 50, rounds).await;

    println!("\n[phase 2] exact seat, non-blocking");
    phase_exact(LockStrategy::NonBlocking, 50, rounds).await;

    println!("\n[phase 3] any seat, pool larger than demand");
    phase_any(200, 100, rounds).await;

    println!("\n[phase 4] any seat, demand exceeds pool");
    phase_any(20, 100, rounds).await;

    println!("\n=== benchmark complete ===");
}
