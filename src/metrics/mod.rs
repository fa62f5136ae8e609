//! Prometheus metrics for the Janus CQL proxy
//!
//! Exposes metrics via HTTP endpoint for Prometheus scraping.

use std::sync::OnceLock;
use std::time::Instant;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::proxy::Cluster;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Janus metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Connection metrics
    /// Total client connections accepted
    pub connections_total: IntCounter,
    /// Current active client connections
    pub connections_active: IntGauge,
    /// Total client connections closed
    pub connections_closed: IntCounter,

    // Request metrics
    /// Read responses by outcome (success, failed, unprepared, read_timeout)
    pub reads_total: IntCounterVec,
    /// Aggregated dual-write responses by outcome
    /// (success_both, failed_both, failed_origin_only, failed_target_only)
    pub writes_total: IntCounterVec,
    /// Per-side write failures by cluster and kind (unprepared, write_timeout)
    pub write_failures_total: IntCounterVec,
    /// Requests currently in flight, by kind (read, write)
    pub in_flight_requests: IntGaugeVec,

    // Latency metrics
    /// End-to-end proxy latency by operation (read, write)
    pub proxy_latency_seconds: HistogramVec,
    /// Per-cluster response latency by cluster and operation
    pub cluster_latency_seconds: HistogramVec,

    // Event metrics
    /// Server events by source cluster and action (forwarded, dropped)
    pub events_total: IntCounterVec,
}

const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "janus_connections_total",
            "Total number of client connections accepted",
        )
        .unwrap();

        let connections_active = IntGauge::new(
            "janus_connections_active",
            "Current number of active client connections",
        )
        .unwrap();

        let connections_closed = IntCounter::new(
            "janus_connections_closed_total",
            "Total number of client connections closed",
        )
        .unwrap();

        let reads_total = IntCounterVec::new(
            Opts::new("janus_reads_total", "Read responses by outcome"),
            &["outcome"],
        )
        .unwrap();

        let writes_total = IntCounterVec::new(
            Opts::new(
                "janus_writes_total",
                "Aggregated dual-write responses by outcome",
            ),
            &["outcome"],
        )
        .unwrap();

        let write_failures_total = IntCounterVec::new(
            Opts::new(
                "janus_write_failures_total",
                "Individual write failures by cluster and failure kind",
            ),
            &["cluster", "kind"],
        )
        .unwrap();

        let in_flight_requests = IntGaugeVec::new(
            Opts::new(
                "janus_in_flight_requests",
                "Requests currently in flight by kind",
            ),
            &["kind"],
        )
        .unwrap();

        let proxy_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "janus_proxy_latency_seconds",
                "End-to-end request latency through the proxy",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op"],
        )
        .unwrap();

        let cluster_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "janus_cluster_latency_seconds",
                "Upstream cluster response latency",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["cluster", "op"],
        )
        .unwrap();

        let events_total = IntCounterVec::new(
            Opts::new(
                "janus_events_total",
                "Server events by source cluster and action",
            ),
            &["cluster", "action"],
        )
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_closed.clone()))
            .unwrap();
        registry.register(Box::new(reads_total.clone())).unwrap();
        registry.register(Box::new(writes_total.clone())).unwrap();
        registry
            .register(Box::new(write_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(in_flight_requests.clone()))
            .unwrap();
        registry
            .register(Box::new(proxy_latency_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(cluster_latency_seconds.clone()))
            .unwrap();
        registry.register(Box::new(events_total.clone())).unwrap();

        Self {
            registry,
            connections_total,
            connections_active,
            connections_closed,
            reads_total,
            writes_total,
            write_failures_total,
            in_flight_requests,
            proxy_latency_seconds,
            cluster_latency_seconds,
            events_total,
        }
    }

    /// Record a new connection
    pub fn record_connection_accepted(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a connection closed
    pub fn record_connection_closed(&self) {
        self.connections_active.dec();
        self.connections_closed.inc();
    }

    /// Record a read response outcome
    pub fn record_read_outcome(&self, outcome: &str) {
        self.reads_total.with_label_values(&[outcome]).inc();
    }

    /// Record the aggregated outcome of a dual write
    pub fn record_write_outcome(&self, outcome: &str) {
        self.writes_total.with_label_values(&[outcome]).inc();
    }

    /// Record an individual failed write response from one cluster
    pub fn record_write_failure(&self, cluster: Cluster, kind: &str) {
        self.write_failures_total
            .with_label_values(&[cluster.as_str(), kind])
            .inc();
    }

    pub fn inc_in_flight(&self, kind: &str) {
        self.in_flight_requests.with_label_values(&[kind]).inc();
    }

    pub fn dec_in_flight(&self, kind: &str) {
        self.in_flight_requests.with_label_values(&[kind]).dec();
    }

    /// Observe end-to-end latency for a request that started at `start`
    pub fn observe_proxy_latency(&self, op: &str, start: Instant) {
        self.proxy_latency_seconds
            .with_label_values(&[op])
            .observe(start.elapsed().as_secs_f64());
    }

    /// Observe one cluster's response latency for a request started at `start`
    pub fn observe_cluster_latency(&self, cluster: Cluster, op: &str, start: Instant) {
        self.cluster_latency_seconds
            .with_label_values(&[cluster.as_str(), op])
            .observe(start.elapsed().as_secs_f64());
    }

    /// Record an event frame forwarded to or withheld from the client
    pub fn record_event(&self, cluster: Cluster, action: &str) {
        self.events_total
            .with_label_values(&[cluster.as_str(), action])
            .inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prometheus exposition content type
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serve `/metrics` (Prometheus text format) and `/health` over plain HTTP
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use tracing::{info, warn};

    let listener = TcpListener::bind(addr.parse::<std::net::SocketAddr>()?).await?;
    info!(addr, "Metrics server listening");

    let service = service_fn(|req: Request<Incoming>| async move {
        let (status, content_type, body) = match req.uri().path() {
            "/metrics" => (StatusCode::OK, Some(METRICS_CONTENT_TYPE), metrics().gather()),
            "/health" => (StatusCode::OK, None, "OK".to_string()),
            _ => (StatusCode::NOT_FOUND, None, "Not Found".to_string()),
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        Ok::<_, std::convert::Infallible>(response)
    });

    loop {
        let (stream, _) = listener.accept().await?;
        let service = service.clone();

        tokio::spawn(async move {
            let served = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
            if let Err(e) = served {
                warn!(error = %e, "Metrics connection error");
            }
        });
    }
}
