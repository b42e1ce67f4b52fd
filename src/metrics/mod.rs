//! Aggregation of latency, error, cache and circuit-breaker metrics, with
//! a Prometheus text export.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::resilience::CircuitState;

const MAX_SAMPLES: usize = 1000;

/// Overall health derived from latency and breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// P95 at or under 500 ms and the breaker closed
    Healthy,
    /// P95 at or under 1000 ms
    Degraded,
    /// Anything worse, or the breaker open
    Unhealthy,
}

impl HealthStatus {
    /// String form used in health documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Point-in-time view of the collected metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Snapshot time
    pub timestamp: DateTime<Utc>,
    /// Total recorded requests
    pub request_count: u64,
    /// Mean request latency in ms
    pub request_avg_ms: f64,
    /// P50 request latency in ms
    pub request_p50_ms: f64,
    /// P95 request latency in ms
    pub request_p95_ms: f64,
    /// P99 request latency in ms
    pub request_p99_ms: f64,
    /// Errors as a percentage of requests
    pub error_rate: f64,
    /// Cache hits as a percentage of cache reads
    pub cache_hit_rate: f64,
    /// P95 outbound API latency in ms
    pub api_latency_p95_ms: f64,
    /// API errors as a percentage of API calls
    pub api_error_rate: f64,
    /// Times the breaker tripped open
    pub circuit_breaker_trips: u64,
    /// Times the breaker recovered to closed
    pub circuit_breaker_recoveries: u64,
    /// Current breaker state
    pub circuit_breaker_state: CircuitState,
    /// Time since the collector was created
    pub uptime: Duration,
    /// Time of the last API call
    pub last_api_call: Option<DateTime<Utc>>,
}

struct CollectorState {
    request_count: u64,
    error_count: u64,
    success_count: u64,
    request_durations: VecDeque<Duration>,

    cache_hits: u64,
    cache_misses: u64,

    api_latencies: VecDeque<Duration>,
    api_errors: u64,
    api_successes: u64,
    api_status_codes: HashMap<u16, u64>,
    last_api_call: Option<DateTime<Utc>>,

    circuit_trips: u64,
    circuit_recoveries: u64,
    circuit_state: CircuitState,

    started_at: DateTime<Utc>,
}

impl CollectorState {
    fn new() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            success_count: 0,
            request_durations: VecDeque::with_capacity(MAX_SAMPLES),
            cache_hits: 0,
            cache_misses: 0,
            api_latencies: VecDeque::with_capacity(MAX_SAMPLES),
            api_errors: 0,
            api_successes: 0,
            api_status_codes: HashMap::new(),
            last_api_call: None,
            circuit_trips: 0,
            circuit_recoveries: 0,
            circuit_state: CircuitState::Closed,
            started_at: Utc::now(),
        }
    }
}

/// Thread-safe counter and ring-buffer aggregator for the whole pipeline.
///
/// Keeps the last 1000 request and API latency samples; percentiles are
/// computed by sorting on demand at snapshot time.
pub struct MetricsCollector {
    state: RwLock<CollectorState>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a collector.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CollectorState::new()),
        }
    }

    /// Record one pipeline request and whether it failed.
    pub fn record_request(&self, duration: Duration, failed: bool) {
        let mut state = self.state.write().unwrap();
        state.request_count += 1;
        if state.request_durations.len() >= MAX_SAMPLES {
            state.request_durations.pop_front();
        }
        state.request_durations.push_back(duration);
        if failed {
            state.error_count += 1;
        } else {
            state.success_count += 1;
        }
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.state.write().unwrap().cache_hits += 1;
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.state.write().unwrap().cache_misses += 1;
    }

    /// Record one outbound API call with its HTTP status.
    pub fn record_api_call(&self, duration: Duration, status_code: u16, failed: bool) {
        let mut state = self.state.write().unwrap();
        state.last_api_call = Some(Utc::now());
        if state.api_latencies.len() >= MAX_SAMPLES {
            state.api_latencies.pop_front();
        }
        state.api_latencies.push_back(duration);
        *state.api_status_codes.entry(status_code).or_insert(0) += 1;
        if failed {
            state.api_errors += 1;
        } else {
            state.api_successes += 1;
        }
    }

    /// Record the breaker state, counting trips and recoveries only when
    /// the state actually changes.
    pub fn record_circuit_breaker_state(&self, new_state: CircuitState) {
        let mut state = self.state.write().unwrap();
        let old = state.circuit_state;
        state.circuit_state = new_state;

        if new_state == CircuitState::Open && old != CircuitState::Open {
            state.circuit_trips += 1;
            info!(trips = state.circuit_trips, "circuit breaker tripped");
        } else if new_state == CircuitState::Closed && old != CircuitState::Closed {
            state.circuit_recoveries += 1;
            info!(
                recoveries = state.circuit_recoveries,
                "circuit breaker recovered"
            );
        }
    }

    /// Count of API calls per HTTP status.
    pub fn api_status_codes(&self) -> HashMap<u16, u64> {
        self.state.read().unwrap().api_status_codes.clone()
    }

    /// Compute a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().unwrap();

        let error_rate = if state.request_count > 0 {
            state.error_count as f64 / state.request_count as f64 * 100.0
        } else {
            0.0
        };

        let cache_reads = state.cache_hits + state.cache_misses;
        let cache_hit_rate = if cache_reads > 0 {
            state.cache_hits as f64 / cache_reads as f64 * 100.0
        } else {
            0.0
        };

        let api_calls = state.api_errors + state.api_successes;
        let api_error_rate = if api_calls > 0 {
            state.api_errors as f64 / api_calls as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            timestamp: Utc::now(),
            request_count: state.request_count,
            request_avg_ms: average_ms(&state.request_durations),
            request_p50_ms: percentile_ms(&state.request_durations, 50.0),
            request_p95_ms: percentile_ms(&state.request_durations, 95.0),
            request_p99_ms: percentile_ms(&state.request_durations, 99.0),
            error_rate,
            cache_hit_rate,
            api_latency_p95_ms: percentile_ms(&state.api_latencies, 95.0),
            api_error_rate,
            circuit_breaker_trips: state.circuit_trips,
            circuit_breaker_recoveries: state.circuit_recoveries,
            circuit_breaker_state: state.circuit_state,
            uptime: (Utc::now() - state.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
            last_api_call: state.last_api_call,
        }
    }

    /// Export the snapshot in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            "# HELP nofx_request_count Total requests\n\
             # TYPE nofx_request_count counter\n\
             nofx_request_count {}\n\
             \n\
             # HELP nofx_request_latency_p95_ms P95 request latency in milliseconds\n\
             # TYPE nofx_request_latency_p95_ms gauge\n\
             nofx_request_latency_p95_ms {:.2}\n\
             \n\
             # HELP nofx_error_rate Request error rate in percent\n\
             # TYPE nofx_error_rate gauge\n\
             nofx_error_rate {:.2}\n\
             \n\
             # HELP nofx_cache_hit_rate Cache hit rate in percent\n\
             # TYPE nofx_cache_hit_rate gauge\n\
             nofx_cache_hit_rate {:.2}\n\
             \n\
             # HELP nofx_api_latency_p95_ms P95 API latency in milliseconds\n\
             # TYPE nofx_api_latency_p95_ms gauge\n\
             nofx_api_latency_p95_ms {:.2}\n\
             \n\
             # HELP nofx_api_error_rate API error rate in percent\n\
             # TYPE nofx_api_error_rate gauge\n\
             nofx_api_error_rate {:.2}\n\
             \n\
             # HELP nofx_circuit_breaker_trips Circuit breaker trips\n\
             # TYPE nofx_circuit_breaker_trips counter\n\
             nofx_circuit_breaker_trips {}\n\
             \n\
             # HELP nofx_circuit_breaker_recoveries Circuit breaker recoveries\n\
             # TYPE nofx_circuit_breaker_recoveries counter\n\
             nofx_circuit_breaker_recoveries {}\n\
             \n\
             # HELP nofx_uptime_seconds Collector uptime in seconds\n\
             # TYPE nofx_uptime_seconds gauge\n\
             nofx_uptime_seconds {:.0}\n",
            snapshot.request_count,
            snapshot.request_p95_ms,
            snapshot.error_rate,
            snapshot.cache_hit_rate,
            snapshot.api_latency_p95_ms,
            snapshot.api_error_rate,
            snapshot.circuit_breaker_trips,
            snapshot.circuit_breaker_recoveries,
            snapshot.uptime.as_secs_f64(),
        )
    }

    /// Map the snapshot to a health status: healthy when P95 is at or
    /// under 500 ms with the breaker closed, degraded up to 1000 ms,
    /// unhealthy beyond that or whenever the breaker is open.
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.snapshot();

        if snapshot.circuit_breaker_state == CircuitState::Open {
            return HealthStatus::Unhealthy;
        }
        if snapshot.request_p95_ms <= 500.0 && snapshot.circuit_breaker_state == CircuitState::Closed
        {
            return HealthStatus::Healthy;
        }
        if snapshot.request_p95_ms <= 1000.0 {
            return HealthStatus::Degraded;
        }
        HealthStatus::Unhealthy
    }

    /// Zero every counter and buffer (for tests).
    pub fn reset(&self) {
        *self.state.write().unwrap() = CollectorState::new();
        info!("metrics collector reset");
    }
}

fn average_ms(durations: &VecDeque<Duration>) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let total: Duration = durations.iter().sum();
    total.as_secs_f64() / durations.len() as f64 * 1000.0
}

fn percentile_ms(durations: &VecDeque<Duration>, percentile: f64) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<Duration> = durations.iter().copied().collect();
    sorted.sort_unstable();

    let index = ((sorted.len() - 1) as f64 * percentile / 100.0) as usize;
    sorted[index.min(sorted.len() - 1)].as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100), false);
        collector.record_request(Duration::from_millis(200), true);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert!((snapshot.error_rate - 50.0).abs() < 1e-9);
        assert!((snapshot.request_avg_ms - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_percentiles() {
        let collector = MetricsCollector::new();
        for ms in 1..=100u64 {
            collector.record_request(Duration::from_millis(ms), false);
        }

        let snapshot = collector.snapshot();
        // Index (99 * 0.50) = 49 -> 50 ms; (99 * 0.95) = 94 -> 95 ms.
        assert!((snapshot.request_p50_ms - 50.0).abs() < 1.0);
        assert!((snapshot.request_p95_ms - 95.0).abs() < 1.0);
        assert!(snapshot.request_p99_ms >= snapshot.request_p95_ms);
    }

    #[test]
    fn test_ring_buffer_caps_samples() {
        let collector = MetricsCollector::new();
        // 1500 slow samples, then 1000 fast ones; only the fast remain.
        for _ in 0..1500 {
            collector.record_request(Duration::from_millis(900), false);
        }
        for _ in 0..1000 {
            collector.record_request(Duration::from_millis(10), false);
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.request_count, 2500);
        assert!(snapshot.request_p99_ms < 50.0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let collector = MetricsCollector::new();
        collector.record_cache_hit();
        collector.record_cache_hit();
        collector.record_cache_miss();

        let snapshot = collector.snapshot();
        assert!((snapshot.cache_hit_rate - 200.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_api_call_status_codes() {
        let collector = MetricsCollector::new();
        collector.record_api_call(Duration::from_millis(50), 200, false);
        collector.record_api_call(Duration::from_millis(60), 200, false);
        collector.record_api_call(Duration::from_millis(70), 503, true);

        let codes = collector.api_status_codes();
        assert_eq!(codes.get(&200), Some(&2));
        assert_eq!(codes.get(&503), Some(&1));

        let snapshot = collector.snapshot();
        assert!((snapshot.api_error_rate - 100.0 / 3.0).abs() < 1e-6);
        assert!(snapshot.last_api_call.is_some());
    }

    #[test]
    fn test_circuit_transitions_counted_on_change_only() {
        let collector = MetricsCollector::new();
        collector.record_circuit_breaker_state(CircuitState::Open);
        collector.record_circuit_breaker_state(CircuitState::Open);
        collector.record_circuit_breaker_state(CircuitState::HalfOpen);
        collector.record_circuit_breaker_state(CircuitState::Closed);
        collector.record_circuit_breaker_state(CircuitState::Closed);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.circuit_breaker_trips, 1);
        assert_eq!(snapshot.circuit_breaker_recoveries, 1);
    }

    #[test]
    fn test_health_mapping() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100), false);
        assert_eq!(collector.health(), HealthStatus::Healthy);

        collector.reset();
        for _ in 0..100 {
            collector.record_request(Duration::from_millis(800), false);
        }
        assert_eq!(collector.health(), HealthStatus::Degraded);

        collector.reset();
        for _ in 0..100 {
            collector.record_request(Duration::from_millis(1500), false);
        }
        assert_eq!(collector.health(), HealthStatus::Unhealthy);

        collector.reset();
        collector.record_circuit_breaker_state(CircuitState::Open);
        assert_eq!(collector.health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_prometheus_export_names() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100), false);

        let text = collector.export_prometheus();
        assert!(text.contains("nofx_request_count 1"));
        assert!(text.contains("# TYPE nofx_request_latency_p95_ms gauge"));
        assert!(text.contains("nofx_cache_hit_rate"));
        assert!(text.contains("nofx_circuit_breaker_trips"));
        assert!(text.contains("nofx_uptime_seconds"));
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100), true);
        collector.reset();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.error_rate, 0.0);
    }
}
