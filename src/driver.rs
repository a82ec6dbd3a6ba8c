//! Runs a population of actors against the booking engine, one attempt each,
//! and collects what happened.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::booking::{AttemptMode, BookingEngine, BookingError, OutcomeRecord, SkipExhaustion, Tally};
use crate::config::Config;
use crate::model::{ActorId, ResourceId};
use crate::store::{LockStrategy, ResourceStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Every actor goes for the same seat.
    Exact {
        resource_id: ResourceId,
        strategy: LockStrategy,
    },
    /// Every actor takes whatever seat on the flight is free.
    AnyAvailable { flight_id: String },
}

impl Scenario {
    pub fn mode(&self) -> AttemptMode {
        match self {
            Scenario::Exact { strategy, .. } => AttemptMode::Exact(*strategy),
            Scenario::AnyAvailable { .. } => AttemptMode::AnyAvailable,
        }
    }

    pub fn target(&self) -> Option<ResourceId> {
        match self {
            Scenario::Exact { resource_id, .. } => Some(*resource_id),
            Scenario::AnyAvailable { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Scenario::Exact {
                resource_id,
                strategy,
            } => format!("exact seat {resource_id} ({strategy})"),
            Scenario::AnyAvailable { flight_id } => format!("any seat on {flight_id} (skip_contended)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub scenario: String,
    pub actors: usize,
    pub records: Vec<OutcomeRecord>,
    pub tally: Tally,
    pub elapsed_ms: f64,
}

impl TrialReport {
    pub fn booked_resources(&self) -> Vec<ResourceId> {
        self.records
            .iter()
            .filter_map(|r| r.outcome.booked_resource())
            .collect()
    }

    /// Two `Booked` outcomes naming the same seat.
    pub fn has_double_booking(&self) -> bool {
        let booked = self.booked_resources();
        let distinct: HashSet<_> = booked.iter().collect();
        distinct.len() != booked.len()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} | {} attempts by {} actors in {:.1}ms, {} found no free seat\n  {}\n",
            self.scenario,
            self.tally.total(),
            self.actors,
            self.elapsed_ms,
            self.tally.unavailable(),
            self.tally
        );
        for r in &self.records {
            let seat = r.resource_id.map_or("-".to_string(), |id| id.to_string());
            out.push_str(&format!(
                "  {:<14} seat={:<4} {:<10} {}",
                r.actor.as_str(),
                seat,
                r.state,
                r.outcome
            ));
            if let Some(msg) = &r.message {
                out.push_str(&format!(" ({msg})"));
            }
            out.push('\n');
        }
        out
    }
}

/// Fixed population of concurrent actors. Each trial spawns one task per
/// actor and waits for all of them before returning.
#[derive(Clone)]
pub struct Simulation {
    engine: BookingEngine,
    actors: usize,
    attempt_timeout: Option<Duration>,
}

impl Simulation {
    pub fn new(engine: BookingEngine, actors: usize) -> Self {
        Self {
            engine,
            actors,
            attempt_timeout: None,
        }
    }

    /// Abandon attempts that run longer than `limit`. The abandoned attempt is
    /// dropped, which releases its locks and discards its writes.
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    pub async fn run_trial(&self, scenario: &Scenario) -> Result<TrialReport, BookingError> {
        if let Scenario::Exact {
            resource_id,
            strategy: LockStrategy::SkipContended,
        } = scenario
        {
            return Err(BookingError::SkipContendedOnExactTarget(*resource_id));
        }

        info!("starting trial: {} with {} actors", scenario.label(), self.actors);
        let start = Instant::now();

        let handles: Vec<_> = (1..=self.actors)
            .map(|n| {
                let engine = self.engine.clone();
                let scenario = scenario.clone();
                let timeout = self.attempt_timeout;
                tokio::spawn(run_attempt(engine, ActorId::passenger(n), scenario, timeout))
            })
            .collect();

        let records: Vec<OutcomeRecord> = join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(i, joined)| match joined {
                Ok(record) => record,
                Err(e) => {
                    error!("actor task {} failed: {e}", i + 1);
                    OutcomeRecord::abandoned(
                        ActorId::passenger(i + 1),
                        scenario.mode(),
                        scenario.target(),
                        format!("attempt task failed: {e}"),
                        start.elapsed(),
                    )
                }
            })
            .collect();

        let tally = Tally::from_records(&records);
        let elapsed = start.elapsed();
        info!("trial finished in {:.1}ms: {tally}", elapsed.as_secs_f64() * 1000.0);

        Ok(TrialReport {
            scenario: scenario.label(),
            actors: self.actors,
            records,
            tally,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    /// Puts every seat of the flight back to available for the next trial.
    pub async fn reset_flight(&self, flight_id: &str) -> Result<u64, BookingError> {
        let n = self.engine.store().reset_flight(flight_id).await?;
        info!("reset {n} seats on flight {flight_id} to available");
        Ok(n)
    }
}

async fn run_attempt(
    engine: BookingEngine,
    actor: ActorId,
    scenario: Scenario,
    timeout: Option<Duration>,
) -> OutcomeRecord {
    let started = Instant::now();
    let attempt = async {
        match &scenario {
            Scenario::Exact {
                resource_id,
                strategy,
            } => engine.attempt_exact_booking(&actor, *resource_id, *strategy).await,
            Scenario::AnyAvailable { flight_id } => {
                Ok(engine.attempt_any_booking(&actor, flight_id).await)
            }
        }
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[{actor}] attempt timed out after {limit:?}, abandoning");
                return OutcomeRecord::abandoned(
                    actor.clone(),
                    scenario.mode(),
                    scenario.target(),
                    format!("attempt timed out after {limit:?}"),
                    started.elapsed(),
                );
            }
        },
        None => attempt.await,
    };

    result.unwrap_or_else(|e| {
        OutcomeRecord::abandoned(
            actor.clone(),
            scenario.mode(),
            scenario.target(),
            e.to_string(),
            started.elapsed(),
        )
    })
}

/// Seeds the configured flight, then runs the blocking, non-blocking and
/// any-available trials with a reset between each. The store is torn down
/// afterwards whether or not the trials succeeded.
pub async fn run_all_trials(
    config: &Config,
    store: Arc<dyn ResourceStore>,
) -> Result<Vec<TrialReport>, BookingError> {
    let result = run_trials(config, store.clone()).await;
    if let Err(e) = store.teardown().await {
        warn!("teardown failed: {e}");
        if result.is_ok() {
            return Err(e.into());
        }
    }
    result
}

async fn run_trials(
    config: &Config,
    store: Arc<dyn ResourceStore>,
) -> Result<Vec<TrialReport>, BookingError> {
    let seats = store.seed_flight(&config.flight_id, config.seats).await?;
    info!("seeded {} seats on flight {}", seats.len(), config.flight_id);
    let target = store
        .find_seat(&config.flight_id, &config.target_seat)
        .await?
        .ok_or_else(|| BookingError::UnknownSeat {
            flight_id: config.flight_id.clone(),
            seat_number: config.target_seat.clone(),
        })?;

    let skip_exhaustion = if config.report_skips {
        SkipExhaustion::Contended
    } else {
        SkipExhaustion::NotFound
    };
    let engine = BookingEngine::new(store.clone())
        .with_decision_latency(config.decision_latency)
        .with_skip_exhaustion(skip_exhaustion);
    let mut sim = Simulation::new(engine, config.passengers);
    if let Some(limit) = config.attempt_timeout {
        sim = sim.with_attempt_timeout(limit);
    }

    let scenarios = [
        Scenario::Exact {
            resource_id: target.id,
            strategy: LockStrategy::Blocking,
        },
        Scenario::Exact {
            resource_id: target.id,
            strategy: LockStrategy::NonBlocking,
        },
        Scenario::AnyAvailable {
            flight_id: config.flight_id.clone(),
        },
    ];

    let mut reports = Vec::with_capacity(scenarios.len());
    for (i, scenario) in scenarios.iter().enumerate() {
        if i > 0 {
            sim.reset_flight(&config.flight_id).await?;
        }
        let report = sim.run_trial(scenario).await?;
        if report.has_double_booking() {
            warn!("double booking detected in trial '{}'", report.scenario);
        }
        reports.push(report);
    }

    for seat in store.list(&config.flight_id).await? {
        if let Some(owner) = &seat.owner {
            info!("seat {} held by {owner}", seat.seat_number);
        }
    }
    Ok(reports)
}
