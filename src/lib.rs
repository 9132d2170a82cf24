//! Scheduled repost pipeline: ingest topic articles, backfill AI captions,
//! publish due reposts and sweep stale rows, each on its own recurring
//! trigger.

pub mod caption;
pub mod clock;
pub mod config;
pub mod db;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod services;
