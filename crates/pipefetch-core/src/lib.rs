pub mod checksum;
pub mod config;
pub mod event_log;
pub mod fetch;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod observer;
pub mod persist;
pub mod pipeline;
pub mod pool;
pub mod source;
pub mod storage;

pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineOutcome, PipelineReport, PipelineState};
