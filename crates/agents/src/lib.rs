pub mod job;
pub mod manager;
pub mod pipeline;
pub mod timer;

pub use job::{PeriodicJob, StatsReportJob};
pub use manager::PipelineManager;
pub use pipeline::RetentionPipeline;
pub use timer::RecurringTimer;
