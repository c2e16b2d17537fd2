//! In-process session metrics.
//!
//! Label-keyed counters and a latency histogram kept as atomics in `DashMap`s,
//! rendered on demand in Prometheus text exposition format.

pub mod metrics;

pub use metrics::SessionMetrics;
