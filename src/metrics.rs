//! Prometheus metrics for GalleryStore
//!
//! Defines metrics for:
//! - HTTP request counts and latency
//! - Storage operation counts and duration per provider
//! - Access control decisions
//! - Credential renewal notices

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// HTTP request counter by method and status
    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("gallerystore_http_requests_total", "Total HTTP requests"),
        &["method", "status"]
    )
    .expect("Failed to create HTTP_REQUESTS metric");

    /// HTTP request latency histogram
    pub static ref HTTP_REQUEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gallerystore_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .expect("Failed to create HTTP_REQUEST_DURATION metric");

    /// Storage operation counter by provider, operation and status
    pub static ref STORAGE_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("gallerystore_storage_operations_total", "Total storage operations"),
        &["provider", "operation", "status"]
    )
    .expect("Failed to create STORAGE_OPERATIONS metric");

    /// Storage operation duration histogram
    pub static ref STORAGE_OPERATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gallerystore_storage_operation_duration_seconds",
            "Storage operation duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .expect("Failed to create STORAGE_OPERATION_DURATION metric");

    /// Access control decisions by outcome (allow/deny)
    pub static ref ACCESS_DECISIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("gallerystore_access_decisions_total", "Access control decisions"),
        &["outcome"]
    )
    .expect("Failed to create ACCESS_DECISIONS metric");

    /// Credential renewal notices emitted, by provider
    pub static ref CREDENTIAL_NOTICES: IntCounterVec = IntCounterVec::new(
        Opts::new("gallerystore_credential_notices_total", "Credential renewal notices"),
        &["provider"]
    )
    .expect("Failed to create CREDENTIAL_NOTICES metric");
}

/// Initialize metrics and register with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone())).unwrap();
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone())).unwrap();
    REGISTRY.register(Box::new(STORAGE_OPERATIONS.clone())).unwrap();
    REGISTRY.register(Box::new(STORAGE_OPERATION_DURATION.clone())).unwrap();
    REGISTRY.register(Box::new(ACCESS_DECISIONS.clone())).unwrap();
    REGISTRY.register(Box::new(CREDENTIAL_NOTICES.clone())).unwrap();
}
