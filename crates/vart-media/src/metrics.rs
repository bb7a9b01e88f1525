//! Media-level metrics recorded through the `metrics` facade.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CHUNKS_ENCODED_TOTAL: &str = "vart_chunks_encoded_total";
    pub const CHUNK_FRAMES_TOTAL: &str = "vart_chunk_frames_total";
    pub const CHUNK_ENCODE_SECONDS: &str = "vart_chunk_encode_seconds";
    pub const CONCAT_TOTAL: &str = "vart_concat_total";
    pub const CONCAT_FALLBACKS_TOTAL: &str = "vart_concat_fallbacks_total";
}

/// Record a finished chunk.
pub fn record_chunk_encoded(writer: &str, frames: u64, duration_secs: f64) {
    let labels = [("writer", writer.to_string())];
    counter!(names::CHUNKS_ENCODED_TOTAL, &labels).increment(1);
    counter!(names::CHUNK_FRAMES_TOTAL).increment(frames);
    histogram!(names::CHUNK_ENCODE_SECONDS).record(duration_secs);
}

/// Record which concatenation strategy produced the output.
pub fn record_concat(strategy: &str, degraded: bool) {
    let labels = [
        ("strategy", strategy.to_string()),
        ("degraded", degraded.to_string()),
    ];
    counter!(names::CONCAT_TOTAL, &labels).increment(1);
}

/// Record a concatenation strategy that failed and handed over to the next.
pub fn record_concat_fallback(strategy: &str) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::CONCAT_FALLBACKS_TOTAL, &labels).increment(1);
}
