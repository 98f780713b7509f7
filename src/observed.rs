//! Instrumented [`Client`] decorator.
//!
//! [`ObservedClient`] wraps any [`Client`] and forwards every call
//! unchanged, adding a tracing span, a duration/count/error observation on
//! the operation's [`OperationMetrics`], and an error log line when the call
//! fails. Results and errors pass through untouched.
//!
//! The bookkeeping lives in an [`Observation`] guard created before the call
//! is forwarded. It records exactly once: either when the call returns, or
//! when the guard is dropped because the caller abandoned the future.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, field, info_span, Instrument, Span};

use crate::client::{ByteStream, Client, QueryParams};
use crate::error::ClientError;
use crate::metrics::{ClientMetrics, OperationMetrics};
use crate::models::BundleId;

/// Wraps a [`Client`] with error logging, Prometheus metrics, and tracing.
pub struct ObservedClient<C> {
    inner: C,
    metrics: ClientMetrics,
}

impl<C: Client> ObservedClient<C> {
    pub fn new(inner: C, metrics: ClientMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }
}

/// Pending observation of one call.
struct Observation<'a> {
    name: &'static str,
    metrics: &'a OperationMetrics,
    bundle_id: BundleId,
    span: Span,
    began: Instant,
    recorded: bool,
}

impl<'a> Observation<'a> {
    fn start(name: &'static str, metrics: &'a OperationMetrics, bundle_id: BundleId, span: Span) -> Self {
        Self {
            name,
            metrics,
            bundle_id,
            span,
            began: Instant::now(),
            recorded: false,
        }
    }

    fn span(&self) -> Span {
        self.span.clone()
    }

    fn finish<T>(mut self, result: &Result<T, ClientError>) {
        let err = result.as_ref().err().map(|e| e.to_string());
        self.record(err);
    }

    fn record(&mut self, err: Option<String>) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let secs = self.began.elapsed().as_secs_f64();
        self.metrics.observe(secs, 1.0, err.is_some());

        if let Some(err) = err {
            self.span.record("error", field::display(&err));
            error!(
                parent: &self.span,
                error = %err,
                bundle_id = %self.bundle_id,
                "{}",
                self.name
            );
        }
    }
}

impl Drop for Observation<'_> {
    fn drop(&mut self) {
        self.record(Some("cancelled".to_string()));
    }
}

#[async_trait]
impl<C: Client> Client for ObservedClient<C> {
    async fn send_upload(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError> {
        let obs = Observation::start(
            "client.send-upload",
            &self.metrics.send_upload,
            bundle_id,
            info_span!("observed.send_upload", %bundle_id, error = field::Empty),
        );
        let result = self
            .inner
            .send_upload(bundle_id, body)
            .instrument(obs.span())
            .await;
        obs.finish(&result);
        result
    }

    async fn get_upload(&self, bundle_id: BundleId, dir: &Path) -> Result<PathBuf, ClientError> {
        let obs = Observation::start(
            "client.get-upload",
            &self.metrics.get_upload,
            bundle_id,
            info_span!("observed.get_upload", %bundle_id, error = field::Empty),
        );
        let result = self
            .inner
            .get_upload(bundle_id, dir)
            .instrument(obs.span())
            .await;
        obs.finish(&result);
        result
    }

    async fn send_db(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError> {
        let obs = Observation::start(
            "client.send-db",
            &self.metrics.send_db,
            bundle_id,
            info_span!("observed.send_db", %bundle_id, error = field::Empty),
        );
        let result = self
            .inner
            .send_db(bundle_id, body)
            .instrument(obs.span())
            .await;
        obs.finish(&result);
        result
    }

    async fn query_bundle(
        &self,
        bundle_id: BundleId,
        op: &str,
        params: &QueryParams,
    ) -> Result<Value, ClientError> {
        let obs = Observation::start(
            "client.query-bundle",
            &self.metrics.query_bundle,
            bundle_id,
            info_span!("observed.query_bundle", %bundle_id, op, error = field::Empty),
        );
        let result = self
            .inner
            .query_bundle(bundle_id, op, params)
            .instrument(obs.span())
            .await;
        obs.finish(&result);
        result
    }
}
