use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use seatlock::booking::{BookingEngine, BookingError, Outcome};
use seatlock::config::Config;
use seatlock::driver::{self, Scenario, Simulation};
use seatlock::model::{ActorId, SeatStatus};
use seatlock::store::{InMemoryStore, LockRead, LockStrategy, ResourceStore, Selector};

const FLIGHT: &str = "SG-101";

// ── Test infrastructure ──────────────────────────────────────

async fn setup(seats: usize, actors: usize, latency_ms: u64) -> (InMemoryStore, Simulation) {
    let store = InMemoryStore::new();
    store.seed_flight(FLIGHT, seats).await.unwrap();
    let engine = BookingEngine::new(Arc::new(store.clone()))
        .with_decision_latency(Duration::from_millis(latency_ms));
    (store, Simulation::new(engine, actors))
}

async fn first_seat(store: &InMemoryStore) -> seatlock::model::Resource {
    store.find_seat(FLIGHT, "1A").await.unwrap().unwrap()
}

// ── Exact target ─────────────────────────────────────────────

#[tokio::test]
async fn one_seat_ten_blocking_attempts() {
    let (store, sim) = setup(1, 10, 10).await;
    let seat = first_seat(&store).await;

    let report = sim
        .run_trial(&Scenario::Exact {
            resource_id: seat.id,
            strategy: LockStrategy::Blocking,
        })
        .await
        .unwrap();

    assert_eq!(report.records.len(), 10);
    assert_eq!(report.tally.booked, 1);
    assert_eq!(report.tally.already_taken, 9);

    let winner = report
        .records
        .iter()
        .find(|r| r.outcome.is_booked())
        .unwrap();
    let seat = store.fetch(seat.id).await.unwrap().unwrap();
    assert_eq!(seat.status, SeatStatus::Occupied);
    assert_eq!(seat.owner.as_ref(), Some(&winner.actor));
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn non_blocking_attempts_never_double_book() {
    let (store, sim) = setup(1, 10, 20).await;
    let seat = first_seat(&store).await;

    let report = sim
        .run_trial(&Scenario::Exact {
            resource_id: seat.id,
            strategy: LockStrategy::NonBlocking,
        })
        .await
        .unwrap();

    let t = &report.tally;
    assert_eq!(t.booked, 1);
    assert_eq!(t.booked + t.contended_failed + t.already_taken, 10);
    assert_eq!(t.transaction_error, 0);
    assert!(t.contended_failed > 0);
}

#[tokio::test]
async fn skip_contended_exact_trial_is_rejected() {
    let (store, sim) = setup(1, 3, 0).await;
    let seat = first_seat(&store).await;

    let result = sim
        .run_trial(&Scenario::Exact {
            resource_id: seat.id,
            strategy: LockStrategy::SkipContended,
        })
        .await;

    assert!(matches!(result, Err(BookingError::SkipContendedOnExactTarget(_))));
    assert!(store.fetch(seat.id).await.unwrap().unwrap().is_available());
}

// ── Any available ────────────────────────────────────────────

#[tokio::test]
async fn ten_seats_ten_any_available_attempts() {
    let (store, sim) = setup(10, 10, 0).await;

    let report = sim
        .run_trial(&Scenario::AnyAvailable {
            flight_id: FLIGHT.into(),
        })
        .await
        .unwrap();

    assert_eq!(report.tally.booked, 10);
    assert!(!report.has_double_booking());
    let booked: HashSet<_> = report.booked_resources().into_iter().collect();
    assert_eq!(booked.len(), 10);

    for seat in store.list(FLIGHT).await.unwrap() {
        assert_eq!(seat.status, SeatStatus::Occupied);
        let record = report
            .records
            .iter()
            .find(|r| r.outcome == Outcome::Booked(seat.id))
            .unwrap();
        assert_eq!(seat.owner.as_ref(), Some(&record.actor));
    }
}

#[tokio::test]
async fn more_actors_than_seats_exhausts_pool() {
    let (store, sim) = setup(3, 8, 5).await;

    let report = sim
        .run_trial(&Scenario::AnyAvailable {
            flight_id: FLIGHT.into(),
        })
        .await
        .unwrap();

    assert_eq!(report.tally.booked, 3);
    assert_eq!(report.tally.not_found, 5);
    assert!(!report.has_double_booking());
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn commit_failure_under_load_loses_only_that_booking() {
    let (store, sim) = setup(10, 10, 0).await;
    store.fail_next_commits(1);

    let report = sim
        .run_trial(&Scenario::AnyAvailable {
            flight_id: FLIGHT.into(),
        })
        .await
        .unwrap();

    assert_eq!(report.tally.transaction_error, 1);
    assert_eq!(report.tally.booked, 9);

    let seats = store.list(FLIGHT).await.unwrap();
    let occupied = seats.iter().filter(|s| s.status == SeatStatus::Occupied).count();
    assert_eq!(occupied, 9);
    assert!(seats.iter().all(|s| s.is_consistent()));
}

// ── Between trials ───────────────────────────────────────────

#[tokio::test]
async fn reset_restores_pool_between_trials() {
    let (store, sim) = setup(2, 4, 0).await;
    let any = Scenario::AnyAvailable {
        flight_id: FLIGHT.into(),
    };

    let first = sim.run_trial(&any).await.unwrap();
    assert_eq!(first.tally.booked, 2);

    assert_eq!(sim.reset_flight(FLIGHT).await.unwrap(), 2);
    assert_eq!(sim.reset_flight(FLIGHT).await.unwrap(), 2);
    let seats = store.list(FLIGHT).await.unwrap();
    assert!(seats.iter().all(|s| s.is_available() && s.owner.is_none()));

    let second = sim.run_trial(&any).await.unwrap();
    assert_eq!(second.tally.booked, 2);
    assert_eq!(second.tally.not_found, 2);
}

#[tokio::test]
async fn timed_out_attempts_release_their_locks() {
    let (store, sim) = setup(1, 3, 0).await;
    let sim = sim.with_attempt_timeout(Duration::from_millis(30));
    let seat = first_seat(&store).await;

    let mut holder = store.begin().await.unwrap();
    let read = holder
        .lock_and_read(&Selector::Exact(seat.id), LockStrategy::Blocking)
        .await
        .unwrap();
    assert!(matches!(read, LockRead::Locked(_)));

    let report = sim
        .run_trial(&Scenario::Exact {
            resource_id: seat.id,
            strategy: LockStrategy::Blocking,
        })
        .await
        .unwrap();

    assert_eq!(report.tally.transaction_error, 3);
    for record in &report.records {
        match &record.outcome {
            Outcome::TransactionError(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected outcome {other}"),
        }
    }
    assert_eq!(store.open_transactions(), 1);

    holder.rollback().await.unwrap();
    assert_eq!(store.open_transactions(), 0);

    let retry = sim
        .run_trial(&Scenario::Exact {
            resource_id: seat.id,
            strategy: LockStrategy::Blocking,
        })
        .await
        .unwrap();
    assert_eq!(retry.tally.booked, 1);
}

#[tokio::test]
async fn report_serializes_to_json() {
    let (_store, sim) = setup(1, 2, 0).await;

    let report = sim
        .run_trial(&Scenario::AnyAvailable {
            flight_id: FLIGHT.into(),
        })
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["actors"], 2);
    assert_eq!(json["tally"]["booked"], 1);
    assert_eq!(json["tally"]["not_found"], 1);
    assert_eq!(json["records"].as_array().unwrap().len(), 2);

    let actors: Vec<_> = report.records.iter().map(|r| r.actor.clone()).collect();
    assert_eq!(actors, vec![ActorId::passenger(1), ActorId::passenger(2)]);
    let summary = report.summary();
    assert!(summary.contains("2 attempts by 2 actors"));
    assert!(summary.contains("1 found no free seat"));
    assert!(summary.contains("booked=1"));
}

// ── Full run ─────────────────────────────────────────────────

#[tokio::test]
async fn full_run_reports_each_trial_and_tears_down() {
    let store = InMemoryStore::new();
    let config = Config {
        decision_latency: Duration::ZERO,
        ..Config::default()
    };

    let reports = driver::run_all_trials(&config, Arc::new(store.clone()))
        .await
        .unwrap();

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].tally.booked, 1);
    assert_eq!(reports[0].tally.already_taken, 9);
    assert_eq!(reports[1].tally.booked, 1);
    assert_eq!(reports[2].tally.booked, 10);
    assert!(reports.iter().all(|r| !r.has_double_booking()));
    assert!(store.list(&config.flight_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_run_still_tears_down() {
    let store = InMemoryStore::new();
    let config = Config {
        target_seat: "9Z".into(),
        decision_latency: Duration::ZERO,
        ..Config::default()
    };

    let result = driver::run_all_trials(&config, Arc::new(store.clone())).await;

    match result {
        Err(BookingError::UnknownSeat { seat_number, .. }) => assert_eq!(seat_number, "9Z"),
        other => panic!("expected unknown seat, got {other:?}"),
    }
    assert!(store.list(&config.flight_id).await.unwrap().is_empty());
    assert!(store.find_seat(&config.flight_id, "1A").await.unwrap().is_none());
}
