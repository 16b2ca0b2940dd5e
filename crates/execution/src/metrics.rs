use occstore_datastore::db_metrics::MVS_METRICS;
use occstore_metrics::metrics_group;
use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge};

metrics_group!(
    #[non_exhaustive]
    pub struct SchedulerMetrics {
        #[name = occstore_scheduler_executions_total]
        #[help = "The number of transaction incarnations executed, by outcome"]
        #[labels(outcome: str)]
        pub executions: IntCounterVec,

        #[name = occstore_scheduler_validation_failures_total]
        #[help = "The number of executed transactions which failed validation and were rescheduled"]
        pub validation_failures: IntCounter,

        #[name = occstore_scheduler_rounds]
        #[help = "The number of parallel rounds needed per block, by how the block completed"]
        #[labels(completion: str)]
        #[buckets(1, 2, 3, 5, 10, 20, 50, 100, 1000)]
        pub rounds: HistogramVec,

        #[name = occstore_scheduler_serial_fallbacks_total]
        #[help = "The number of blocks which fell back to sequential execution"]
        pub serial_fallbacks: IntCounter,

        #[name = occstore_scheduler_live_workers]
        #[help = "The number of execution and validation jobs currently running"]
        pub live_workers: IntGauge,
    }
);

pub static SCHEDULER_METRICS: Lazy<SchedulerMetrics> = Lazy::new(SchedulerMetrics::new);

/// Registers the metrics of the scheduler and of the multi-version store with `registry`.
pub fn register_metrics(registry: &prometheus::Registry) -> prometheus::Result<()> {
    registry.register(Box::new(&*SCHEDULER_METRICS))?;
    registry.register(Box::new(&*MVS_METRICS))
}
