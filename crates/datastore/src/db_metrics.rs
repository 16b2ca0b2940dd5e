use occstore_metrics::metrics_group;
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge};

metrics_group!(
    #[non_exhaustive]
    pub struct MvsMetrics {
        #[name = occstore_mvs_validations_total]
        #[help = "The number of transaction validations, by verdict"]
        #[labels(verdict: str)]
        pub validations: IntCounterVec,

        #[name = occstore_mvs_live_validations]
        #[help = "The number of validations currently in progress"]
        pub live_validations: IntGauge,

        #[name = occstore_mvs_estimate_reads_total]
        #[help = "The number of reads or scans that ran into an estimate"]
        pub estimate_reads: IntCounter,

        #[name = occstore_mvs_keys_flushed_total]
        #[help = "The number of keys flushed from the multi-version store into the base store"]
        pub keys_flushed: IntCounter,
    }
);

pub static MVS_METRICS: Lazy<MvsMetrics> = Lazy::new(MvsMetrics::new);
