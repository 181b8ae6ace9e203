use anyhow::Result;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct ServerMetrics {
    pub registry: Registry,
    pub reports_ingested: IntCounter,
    pub reports_rejected: IntCounterVec,
    pub jobs_enqueued: IntCounterVec,
    pub audit_entries_dropped: IntGauge,
    pub retention_runs: IntCounter,
    pub retention_deleted: IntCounter,
    pub retention_duration_seconds: Histogram,
    pub http_errors_total: IntCounterVec,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let reports_ingested = IntCounter::new(
            "bugspotter_reports_ingested_total",
            "Bug reports accepted through the ingestion endpoint",
        )?;
        let reports_rejected = IntCounterVec::new(
            prometheus::Opts::new(
                "bugspotter_reports_rejected_total",
                "Bug reports rejected at ingestion",
            ),
            &["reason"],
        )?;
        let jobs_enqueued = IntCounterVec::new(
            prometheus::Opts::new("bugspotter_jobs_enqueued_total", "Jobs enqueued by queue"),
            &["queue"],
        )?;
        let audit_entries_dropped = IntGauge::new(
            "bugspotter_audit_entries_dropped",
            "Audit entries dropped by buffer overflow",
        )?;
        let retention_runs = IntCounter::new(
            "bugspotter_retention_runs_total",
            "Retention apply runs completed",
        )?;
        let retention_deleted = IntCounter::new(
            "bugspotter_retention_deleted_total",
            "Bug reports removed by retention",
        )?;
        let retention_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "bugspotter_retention_duration_seconds",
                "Duration of a retention apply run",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;
        let http_errors_total = IntCounterVec::new(
            prometheus::Opts::new(
                "bugspotter_http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["code", "status"],
        )?;

        registry.register(Box::new(reports_ingested.clone()))?;
        registry.register(Box::new(reports_rejected.clone()))?;
        registry.register(Box::new(jobs_enqueued.clone()))?;
        registry.register(Box::new(audit_entries_dropped.clone()))?;
        registry.register(Box::new(retention_runs.clone()))?;
        registry.register(Box::new(retention_deleted.clone()))?;
        registry.register(Box::new(retention_duration_seconds.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;

        Ok(Self {
            registry,
            reports_ingested,
            reports_rejected,
            jobs_enqueued,
            audit_entries_dropped,
            retention_runs,
            retention_deleted,
            retention_duration_seconds,
            http_errors_total,
        })
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))
            .body(axum::body::Body::from(buffer))?)
    }
}
