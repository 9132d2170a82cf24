//! Recurring job triggers.
//!
//! Every registered job gets its own task. The task sleeps until the next
//! fire time, runs the job to completion and only then computes the next
//! fire, so a job never overlaps with itself; fires missed while it ran are
//! skipped. Different jobs run concurrently.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

/// Unit of recurring work. Errors are logged by the scheduler and never stop
/// the trigger.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<()>;
}

/// Cron expression with a seconds field (`sec min hour dom month dow [year]`),
/// evaluated in UTC. `"0 */10 * * * *"` fires every ten minutes on the minute.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    cron: cron::Schedule,
}

impl Schedule {
    /// First fire time strictly after `now`, or `None` once the expression
    /// has no fire times left.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.after(&now).next()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for Schedule {
    type Err = cron::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression = s.trim().to_string();
        let cron = cron::Schedule::from_str(&expression)?;
        Ok(Self { expression, cron })
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Schedule {}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

struct Entry {
    schedule: Schedule,
    job: Arc<dyn Job>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the trigger tasks between [`Scheduler::start`] and [`Scheduler::stop`].
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    entries: Vec<Arc<Entry>>,
    running: Option<Running>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
            running: None,
        }
    }

    /// Register a job. Jobs added after `start` only run after a restart.
    pub fn add(&mut self, schedule: Schedule, job: Arc<dyn Job>) {
        self.entries.push(Arc::new(Entry { schedule, job }));
    }

    /// `(job name, schedule)` for every registered job, in registration order.
    pub fn table(&self) -> Vec<(String, Schedule)> {
        self.entries
            .iter()
            .map(|e| (e.job.name().to_string(), e.schedule.clone()))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn one trigger task per job and log the schedule table.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("scheduler already running");
        }
        let (shutdown, rx) = watch::channel(false);
        let now = self.clock.now();

        info!("Scheduled jobs:");
        let tasks = self
            .entries
            .iter()
            .map(|entry| {
                info!(
                    job = entry.job.name(),
                    schedule = %entry.schedule,
                    next_fire = ?entry.schedule.next_after(now),
                    "- scheduled"
                );
                tokio::spawn(run_trigger(entry.clone(), self.clock.clone(), rx.clone()))
            })
            .collect();

        self.running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Stop firing new triggers and wait for in-flight fires to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for res in join_all(running.tasks).await {
            if let Err(err) = res {
                error!(?err, "trigger task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_trigger(entry: Arc<Entry>, clock: Arc<dyn Clock>, mut shutdown: watch::Receiver<bool>) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = clock.now();
        // Never re-fire a slot that already ran, even if the timer woke early.
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = entry.schedule.next_after(from) else {
            warn!(job = entry.job.name(), schedule = %entry.schedule, "no upcoming fire time");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }

        last_fire = Some(next);
        fire(entry.job.clone()).await;
    }
    debug!(job = entry.job.name(), "trigger stopped");
}

/// Run one fire on its own task so a panic is contained and reported.
async fn fire(job: Arc<dyn Job>) {
    let name = job.name().to_string();
    let started = Instant::now();
    debug!(job = %name, "job started");

    let res = tokio::spawn(async move { job.run().await }).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match res {
        Ok(Ok(())) => debug!(job = %name, elapsed_ms, "job finished"),
        Ok(Err(err)) => error!(job = %name, elapsed_ms, ?err, "job failed"),
        Err(err) if err.is_panic() => error!(job = %name, elapsed_ms, "job panicked"),
        Err(err) => error!(job = %name, ?err, "job cancelled"),
    }
}
