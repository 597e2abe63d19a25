//! Prometheus metrics for the queue coordinator and response cache
//!
//! Call `init_metrics()` once at startup. Until it has run (or if registration
//! fails), every recording helper is a no-op, so library code can record
//! unconditionally.

use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, Counter, CounterVec, Encoder,
    GaugeVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct QueueMetrics {
    local_depth: GaugeVec,
    popped: CounterVec,
    processed: CounterVec,
    failed: CounterVec,
    requeued: CounterVec,
    overflows: CounterVec,
}

struct CacheMetrics {
    hits: CounterVec,
    misses: CounterVec,
    decode_failures: CounterVec,
    migrated: Counter,
}

static QUEUE_METRICS: OnceLock<QueueMetrics> = OnceLock::new();
static CACHE_METRICS: OnceLock<CacheMetrics> = OnceLock::new();
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default registry
///
/// Idempotent. On failure the error is returned and recording stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let queue = QueueMetrics {
        local_depth: register_gauge_vec!(
            "recrawl_queue_local_depth",
            "Items waiting in the coordinator's local queue",
            &["key"]
        )?,
        popped: register_counter_vec!(
            "recrawl_queue_items_popped_total",
            "Items popped from the durable queue",
            &["key"]
        )?,
        processed: register_counter_vec!(
            "recrawl_queue_items_processed_total",
            "Items processed successfully by workers",
            &["key"]
        )?,
        failed: register_counter_vec!(
            "recrawl_queue_items_failed_total",
            "Items whose processor returned an error",
            &["key"]
        )?,
        requeued: register_counter_vec!(
            "recrawl_queue_items_requeued_total",
            "Items pushed back to the durable queue on overflow or stop",
            &["key"]
        )?,
        overflows: register_counter_vec!(
            "recrawl_queue_overflows_total",
            "Local queue overflow events",
            &["key"]
        )?,
    };

    let cache = CacheMetrics {
        hits: register_counter_vec!(
            "recrawl_cache_hits_total",
            "Cache lookups that found an entry",
            &["backend"]
        )?,
        misses: register_counter_vec!(
            "recrawl_cache_misses_total",
            "Cache lookups that found nothing",
            &["backend"]
        )?,
        decode_failures: register_counter_vec!(
            "recrawl_cache_decode_failures_total",
            "Cache entries that failed to decompress or decode",
            &["backend"]
        )?,
        migrated: register_counter!(
            "recrawl_cache_migrated_total",
            "Cache entries copied between ephemeral stores"
        )?,
    };

    QUEUE_METRICS.set(queue).map_err(|_| "Queue metrics already initialized")?;
    CACHE_METRICS.set(cache).map_err(|_| "Cache metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    QUEUE_METRICS.get().is_some() && CACHE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Queue
// ============================================================================

/// Set the current local queue depth
pub fn set_local_depth(key: &str, depth: usize) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.local_depth.with_label_values(&[key]).set(depth as f64);
    }
}

/// Record one item popped from the durable queue
pub fn record_popped(key: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.popped.with_label_values(&[key]).inc();
    }
}

/// Record the outcome of one processor call
pub fn record_processed(key: &str, success: bool) {
    let Some(m) = QUEUE_METRICS.get() else {
        return;
    };

    if success {
        m.processed.with_label_values(&[key]).inc();
    } else {
        m.failed.with_label_values(&[key]).inc();
    }
}

/// Record items pushed back to the durable queue
pub fn record_requeued(key: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = QUEUE_METRICS.get() {
        m.requeued.with_label_values(&[key]).inc_by(count as f64);
    }
}

/// Record an overflow event
pub fn record_overflow(key: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.overflows.with_label_values(&[key]).inc();
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Record a point lookup
pub fn record_cache_lookup(backend: &str, hit: bool) {
    let Some(m) = CACHE_METRICS.get() else {
        return;
    };

    if hit {
        m.hits.with_label_values(&[backend]).inc();
    } else {
        m.misses.with_label_values(&[backend]).inc();
    }
}

/// Record entries that failed to decode
pub fn record_decode_failures(backend: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = CACHE_METRICS.get() {
        m.decode_failures
            .with_label_values(&[backend])
            .inc_by(count as f64);
    }
}

/// Record entries copied by a migration
pub fn record_migrated(count: usize) {
    if let Some(m) = CACHE_METRICS.get() {
        m.migrated.inc_by(count as f64);
    }
}
