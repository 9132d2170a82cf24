//! The four recurring jobs and the context they share.
//!
//! Each job is a plain async function over the store and its injected
//! capabilities; [`Pipeline`] bundles those dependencies and
//! [`register_jobs`] wires the jobs into a [`Scheduler`].

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{self, Config, ScheduleTable};
use crate::db::Pool;
use crate::scheduler::{Job, Scheduler};
use crate::services::{
    ArticleSearch, CaptionGenerator, Publisher, SimulatedPublisher, SimulatedSearch,
    TemplateCaptioner,
};

pub mod captions;
pub mod ingest;
pub mod reposts;
pub mod retention;

pub use captions::{generate_captions, CaptionSummary};
pub use ingest::{fetch_articles, IngestSummary};
pub use reposts::{process_due_reposts, process_repost, ProcessSummary, RepostError};
pub use retention::{cleanup_old_data, SweepSummary};

/// Simulated search hits stay stable for this long, so repeated fetches
/// inside one window upsert the same articles.
const SIMULATED_SEARCH_WINDOW_SECS: i64 = 600;

/// Store handle, clock and external capabilities shared by every job.
#[derive(Clone)]
pub struct Pipeline {
    pub pool: Pool,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn Publisher>,
    pub search: Arc<dyn ArticleSearch>,
    pub captioner: Arc<dyn CaptionGenerator>,
    pub reposts: config::Reposts,
    pub retention: config::Retention,
}

impl Pipeline {
    /// Pipeline backed by the simulated publish/search/caption services.
    pub fn simulated(pool: Pool, clock: Arc<dyn Clock>, cfg: &Config) -> Self {
        Self {
            search: Arc::new(SimulatedSearch::new(clock.clone(), SIMULATED_SEARCH_WINDOW_SECS)),
            publisher: Arc::new(SimulatedPublisher),
            captioner: Arc::new(TemplateCaptioner),
            reposts: cfg.reposts.clone(),
            retention: cfg.retention.clone(),
            pool,
            clock,
        }
    }

    pub async fn process_due_reposts(&self) -> Result<ProcessSummary> {
        process_due_reposts(&self.pool, self.publisher.as_ref(), self.clock.as_ref(), &self.reposts)
            .await
    }

    pub async fn fetch_articles(&self) -> Result<IngestSummary> {
        fetch_articles(&self.pool, self.search.as_ref(), self.clock.as_ref()).await
    }

    pub async fn generate_captions(&self) -> Result<CaptionSummary> {
        generate_captions(
            &self.pool,
            self.captioner.as_ref(),
            self.clock.as_ref(),
            self.reposts.caption_batch_size,
        )
        .await
    }

    pub async fn cleanup_old_data(&self) -> SweepSummary {
        cleanup_old_data(&self.pool, self.clock.as_ref(), &self.retention).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineJob {
    ProcessDueReposts,
    FetchArticles,
    GenerateCaptions,
    CleanupOldData,
}

impl PipelineJob {
    pub const ALL: [PipelineJob; 4] = [
        PipelineJob::ProcessDueReposts,
        PipelineJob::FetchArticles,
        PipelineJob::GenerateCaptions,
        PipelineJob::CleanupOldData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineJob::ProcessDueReposts => "process-due-reposts",
            PipelineJob::FetchArticles => "fetch-articles",
            PipelineJob::GenerateCaptions => "generate-captions",
            PipelineJob::CleanupOldData => "cleanup-old-data",
        }
    }
}

/// One pipeline job bound to its context, runnable by the scheduler.
pub struct PipelineTask {
    job: PipelineJob,
    pipeline: Arc<Pipeline>,
}

impl PipelineTask {
    pub fn new(job: PipelineJob, pipeline: Arc<Pipeline>) -> Self {
        Self { job, pipeline }
    }
}

#[async_trait]
impl Job for PipelineTask {
    fn name(&self) -> &str {
        self.job.as_str()
    }

    async fn run(&self) -> Result<()> {
        match self.job {
            PipelineJob::ProcessDueReposts => self.pipeline.process_due_reposts().await.map(drop),
            PipelineJob::FetchArticles => self.pipeline.fetch_articles().await.map(drop),
            PipelineJob::GenerateCaptions => self.pipeline.generate_captions().await.map(drop),
            PipelineJob::CleanupOldData => {
                self.pipeline.cleanup_old_data().await;
                Ok(())
            }
        }
    }
}

/// Register all four jobs on `scheduler` using the configured schedule table.
pub fn register_jobs(
    scheduler: &mut Scheduler,
    pipeline: Arc<Pipeline>,
    table: &ScheduleTable,
) -> Result<()> {
    for (job, (field, expression)) in PipelineJob::ALL.into_iter().zip(table.entries()) {
        let schedule = config::parse_schedule(field, expression)?;
        scheduler.add(schedule, Arc::new(PipelineTask::new(job, pipeline.clone())));
    }
    Ok(())
}

/// Run every job once, in table order. Errors are returned after all jobs ran.
pub async fn run_all_once(pipeline: &Arc<Pipeline>) -> Result<()> {
    let mut first_err = None;
    for job in PipelineJob::ALL {
        let task = PipelineTask::new(job, pipeline.clone());
        if let Err(err) = task.run().await {
            tracing::error!(job = job.as_str(), ?err, "job failed");
            first_err.get_or_insert(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}
