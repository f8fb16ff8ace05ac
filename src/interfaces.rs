//! Interface-only collaborators for chain/metrics/alerting/price-seeding,
//! per §1 and §10.5. Real implementations (metagraph client, Prometheus
//! exporter, PagerDuty, websocket ingestion) are out of scope; only the
//! narrow trait surface the core subsystems depend on lives here, backed by
//! no-op or fixture implementations.

use tracing::error;

/// Severity of an operator-facing alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

/// Per-step and per-uid metrics publication. A real implementation would
/// export to Prometheus; the default here just logs.
pub trait MetricsSink: Send + Sync {
    fn record_step(&self, step: u64, uids_succeeded: usize, uids_failed: usize);
    fn record_uid_outcome(&self, uid: u32, outcome: &str);
}

/// Default `MetricsSink` that publishes nothing, for tests and environments
/// without a metrics backend wired in.
#[derive(Debug, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_step(&self, _step: u64, _uids_succeeded: usize, _uids_failed: usize) {}
    fn record_uid_outcome(&self, _uid: u32, _outcome: &str) {}
}

/// Operator-facing alerting (repo/update failures, simulator liveness,
/// persistence failures). A real implementation would page via PagerDuty.
pub trait AlertSink: Send + Sync {
    fn alert(&self, severity: Severity, message: &str);
}

/// Default `AlertSink`: logs at `error!` and nothing else.
#[derive(Debug, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn alert(&self, severity: Severity, message: &str) {
        error!(?severity, message, "alert");
    }
}

/// An agent's network endpoint, resolved from the chain's metagraph.
#[derive(Debug, Clone, PartialEq)]
pub struct AxonEndpoint {
    pub uid: u32,
    pub host: String,
    pub port: u16,
}

/// Resolution of uid -> axon endpoint from the subtensor chain. Out of scope
/// per §1; implementations here are static/file-backed stand-ins.
pub trait ChainClient: Send + Sync {
    fn resolve_axons(&self) -> Vec<AxonEndpoint>;
}

/// A fixed, in-memory set of axons — for tests and single-box deployments
/// where the chain client isn't wired in.
#[derive(Debug, Default)]
pub struct StaticChainClient {
    pub axons: Vec<AxonEndpoint>,
}

impl ChainClient for StaticChainClient {
    fn resolve_axons(&self) -> Vec<AxonEndpoint> {
        self.axons.clone()
    }
}

/// External reference price for a book, normally sourced from an exchange
/// websocket feed. Out of scope per §1; a constant/fixture implementation
/// suffices for the core subsystems that only need *a* fundamental price.
pub trait PriceSeed: Send + Sync {
    fn fundamental_price(&self, book_id: u32) -> f64;
}

/// Returns a fixed price for every book, configured at construction.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPriceSeed {
    pub price: f64,
}

impl PriceSeed for ConstantPriceSeed {
    fn fundamental_price(&self, _book_id: u32) -> f64 {
        self.price
    }
}
