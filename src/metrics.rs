//! Prometheus metrics for bundle client operations.
//!
//! Every client operation owns an [`OperationMetrics`] triple (duration
//! histogram, call counter, error counter). The metrics are registered in a
//! caller-provided [`Registry`] that `main` builds once and hands to every
//! component that records observations.

use prometheus::{Counter, Histogram, HistogramOpts, Opts, Registry};

const NAMESPACE: &str = "src";

/// Duration, count, and error count for one operation.
#[derive(Clone)]
pub struct OperationMetrics {
    /// How long did it take?
    pub duration: Histogram,
    /// How many calls were made?
    pub count: Counter,
    /// How many of them failed?
    pub errors: Counter,
}

impl OperationMetrics {
    fn new(registry: &Registry, subsystem: &str, stem: &str, what: &str) -> prometheus::Result<Self> {
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("bundle_client_query_{}_duration_seconds", stem),
                format!("Time spent performing {} queries", what),
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem),
        )?;
        let count = Counter::with_opts(
            Opts::new(
                format!("bundle_client_query_{}_total", stem),
                format!("Total number of {} queries", what),
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem),
        )?;
        let errors = Counter::with_opts(
            Opts::new(
                format!("bundle_client_query_{}_errors_total", stem),
                format!("Total number of errors when performing {} queries", what),
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem),
        )?;

        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(count.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            duration,
            count,
            errors,
        })
    }

    /// Record one observation of the operation.
    pub fn observe(&self, secs: f64, count: f64, failed: bool) {
        self.duration.observe(secs);
        self.count.inc_by(count);
        if failed {
            self.errors.inc();
        }
    }
}

/// Metrics for every [`Client`](crate::client::Client) operation.
#[derive(Clone)]
pub struct ClientMetrics {
    pub send_upload: OperationMetrics,
    pub get_upload: OperationMetrics,
    pub send_db: OperationMetrics,
    pub query_bundle: OperationMetrics,
}

impl ClientMetrics {
    /// Create and register the client metrics under `src_<subsystem>_*`.
    ///
    /// Fails if the registry already holds metrics with the same names.
    pub fn new(subsystem: &str, registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            send_upload: OperationMetrics::new(registry, subsystem, "send_upload", "send upload")?,
            get_upload: OperationMetrics::new(registry, subsystem, "get_upload", "get upload")?,
            send_db: OperationMetrics::new(registry, subsystem, "send_db", "send db")?,
            query_bundle: OperationMetrics::new(registry, subsystem, "bundle", "bundle")?,
        })
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> prometheus::Result<String> {
    use prometheus::{Encoder, TextEncoder};

    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
