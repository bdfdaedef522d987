//! Tick scheduling and the bounded worker pool.
//!
//! The scheduler fires on a cron interval (plus one immediate tick at
//! startup) and fans each due source out to a semaphore-bounded worker.
//! A source already in flight from a previous, still-running tick is
//! skipped, so overlapping ticks never run the same source twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::models::{ParseStatus, Source};
use crate::domain::pipeline::{SourcePipeline, SourceRunSummary};
use crate::infrastructure::repository;

/// How long `stop()` waits for in-flight ticks before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("job scheduler error: {0}")]
    Job(#[from] JobSchedulerError),
}

struct TickRunner {
    pool: PgPool,
    pipeline: SourcePipeline,
    permits: Semaphore,
    in_flight: Mutex<HashSet<i32>>,
    /// In-flight tick tasks; `stop()` drains this before returning.
    ticks: tokio::sync::Mutex<JoinSet<()>>,
}

impl TickRunner {
    /// Register one tick in the tracked set. Finished ticks are reaped here
    /// so the set only ever holds live tasks.
    async fn spawn_tick(self: Arc<Self>) {
        let runner = Arc::clone(&self);
        let mut ticks = self.ticks.lock().await;
        while ticks.try_join_next().is_some() {}
        ticks.spawn(async move {
            runner.run_tick().await;
        });
    }

    /// One scheduler firing: fan all due sources out to bounded workers and
    /// wait for them. Errors are logged; the loop never dies over a tick.
    async fn run_tick(self: Arc<Self>) {
        let started = Instant::now();
        let active = match repository::get_active_sources(&self.pool).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::error!(error = %e, "failed to query active sources");
                return;
            }
        };

        let now = Utc::now();
        let sources: Vec<Source> = active.into_iter().filter(|s| s.is_due(now)).collect();

        if sources.is_empty() {
            tracing::debug!("tick: no sources due");
            return;
        }
        tracing::info!(due = sources.len(), "tick started");

        let mut workers: JoinSet<SourceRunSummary> = JoinSet::new();
        for source in sources {
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if !in_flight.insert(source.id) {
                    tracing::debug!(source_id = source.id, "source still in flight, skipping");
                    continue;
                }
            }
            let runner = Arc::clone(&self);
            workers.spawn(async move {
                let summary = runner.run_source_bounded(&source).await;
                runner.in_flight.lock().unwrap().remove(&source.id);
                summary
            });
        }

        let mut inserted_total = 0usize;
        let mut failed = 0usize;
        let mut completed = 0usize;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(summary) => {
                    completed += 1;
                    inserted_total += summary.inserted;
                    if summary.status != ParseStatus::Success {
                        failed += 1;
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "source worker panicked");
                }
            }
        }

        tracing::info!(
            sources = completed,
            failed,
            inserted = inserted_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tick complete"
        );
    }

    /// Run one source once a worker permit is free. The pipeline enforces
    /// its own wall-clock budget and always writes the log row.
    async fn run_source_bounded(&self, source: &Source) -> SourceRunSummary {
        // The semaphore is never closed; a failed acquire means shutdown.
        let Ok(_permit) = self.permits.acquire().await else {
            return SourceRunSummary {
                status: ParseStatus::Error,
                inserted: 0,
            };
        };
        self.pipeline.run_source(source).await
    }
}

pub struct ParseScheduler {
    runner: Arc<TickRunner>,
    interval: String,
    job_scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
    running: Mutex<bool>,
    shutdown: CancellationToken,
}

impl ParseScheduler {
    pub fn new(
        pool: PgPool,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pipeline = SourcePipeline::new(pool.clone(), config, shutdown.clone())?;
        let runner = Arc::new(TickRunner {
            pool,
            pipeline,
            permits: Semaphore::new(config.parsing.max_concurrent_parsers),
            in_flight: Mutex::new(HashSet::new()),
            ticks: tokio::sync::Mutex::new(JoinSet::new()),
        });
        Ok(Self {
            runner,
            interval: config.parsing.interval.clone(),
            job_scheduler: tokio::sync::Mutex::new(None),
            running: Mutex::new(false),
            shutdown,
        })
    }

    /// Begin periodic ticks and fire one immediate tick asynchronously.
    /// Fails when already running.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Err(SchedulerError::AlreadyRunning);
            }
            *running = true;
        }

        let result: Result<(), SchedulerError> = async {
            let scheduler = JobScheduler::new().await?;
            let runner = Arc::clone(&self.runner);
            scheduler
                .add(Job::new_async(self.interval.as_str(), move |_uuid, _lock| {
                    let runner = Arc::clone(&runner);
                    Box::pin(async move {
                        runner.spawn_tick().await;
                    })
                })?)
                .await?;
            scheduler.start().await?;
            *self.job_scheduler.lock().await = Some(scheduler);
            Ok(())
        }
        .await;

        if let Err(e) = result {
            *self.running.lock().unwrap() = false;
            return Err(e);
        }

        // Immediate first tick; the cron job covers the rest.
        Arc::clone(&self.runner).spawn_tick().await;

        tracing::info!(interval = %self.interval, "parse scheduler started");
        Ok(())
    }

    /// Halt scheduling: stop the cron job, cancel in-flight work, and wait
    /// out a bounded grace period for tracked ticks to wind down.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut guard = self.job_scheduler.lock().await;
        let Some(mut scheduler) = guard.take() else {
            return Err(SchedulerError::NotRunning);
        };
        scheduler.shutdown().await?;
        self.shutdown.cancel();

        let mut ticks = self.runner.ticks.lock().await;
        let drain = async {
            while let Some(joined) = ticks.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "tick task failed during shutdown");
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "in-flight ticks outlived the shutdown grace period, aborting"
            );
            ticks.abort_all();
        }

        *self.running.lock().unwrap() = false;
        tracing::info!("parse scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }
}
