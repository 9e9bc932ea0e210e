//! Async consumer and worker pool

pub mod fanout;
pub mod pool;
pub mod processor;

pub use fanout::{AggregationWorker, AnalyticsFanout, FanoutCounters, fanout_channel};
pub use pool::WorkerPool;
pub use processor::{EventProcessor, ProcessOutcome, WorkerCounters};
