use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_histogram_vec, register_int_counter_vec, Counter, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // Job Metrics
    pub static ref JOBS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "jobs_processed_total",
        "Total number of engine jobs processed",
        &["job", "status"]
    )
    .unwrap();

    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "job_duration_seconds",
        "Engine job duration in seconds",
        &["job"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // Store Metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of store operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Store operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Business Metrics
    pub static ref BADGES_AWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "badges_awarded_total",
        "Total number of badges awarded",
        &["badge"]
    )
    .unwrap();

    pub static ref POINTS_CREDITED_TOTAL: Counter = register_counter!(
        "points_credited_total",
        "Total points credited to student ledgers"
    )
    .unwrap();

    pub static ref FEEDBACK_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feedback_requests_total",
        "Total number of feedback service requests",
        &["status"]
    )
    .unwrap();

    pub static ref COGNITIVE_PROFILE_UPDATES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cognitive_profile_updates_total",
        "Total number of cognitive profile recomputations",
        &["tier"]
    )
    .unwrap();

    pub static ref EXPIRY_SWEEPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "expiry_sweeps_total",
        "Total number of quest expiry sweeps",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track store operation with metrics
pub async fn track_store_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Record one finished job run
pub fn record_job(job: &str, status: &str, seconds: f64) {
    JOBS_PROCESSED_TOTAL.with_label_values(&[job, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_operations_are_counted_by_status() {
        let before = STORE_OPERATIONS_TOTAL
            .with_label_values(&["lookup", "unit", "error"])
            .get();

        let result: Result<(), anyhow::Error> =
            track_store_operation("lookup", "unit", async { Err(anyhow::anyhow!("boom")) }).await;

        assert!(result.is_err());
        assert_eq!(
            STORE_OPERATIONS_TOTAL
                .with_label_values(&["lookup", "unit", "error"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_render_metrics() {
        record_job("unit_check", "completed", 0.01);

        let output = render_metrics().unwrap();
        assert!(output.contains("jobs_processed_total"));
        assert!(output.contains("unit_check"));
    }
}
