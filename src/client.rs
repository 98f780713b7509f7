//! HTTP client for the bundle manager service.
//!
//! The [`Client`] trait is the transport contract: four operations, each a
//! single request/response exchange with the bundle manager.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`send_upload`](Client::send_upload) | `POST /uploads/{id}` with the raw LSIF dump |
//! | [`get_upload`](Client::get_upload) | `GET /uploads/{id}`, streamed into a random file |
//! | [`send_db`](Client::send_db) | `POST /dbs/{id}` with a converted database |
//! | [`query_bundle`](Client::query_bundle) | `GET /dbs/{id}/{op}?{params}`, JSON response |
//!
//! [`HttpClient`] is the reqwest-backed implementation. Every request carries
//! a `User-Agent` derived from the process name and
//! `Content-Type: application/json`, holds one [`Limiter`] slot while the
//! request is on the wire, and runs inside a tracing span tagged with the
//! bundle id. Any non-2xx answer becomes [`ClientError::Status`]; the
//! response is dropped (and its connection released) before the error is
//! returned.
//!
//! Cancellation follows the caller: dropping an operation's future aborts
//! the request wherever it is, including while waiting on the limiter.
//! Deadlines come from `bundle_manager.timeout_secs` or from wrapping a call
//! in `tokio::time::timeout`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, field, info_span, Instrument, Span};

use crate::config::BundleManagerConfig;
use crate::error::ClientError;
use crate::limiter::Limiter;
use crate::models::BundleId;

/// Request body streamed to the bundle manager.
pub type ByteStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Query-string parameters of a bundle query, sorted by key.
pub type QueryParams = BTreeMap<String, String>;

/// The bundle manager transport contract.
///
/// Implemented by [`HttpClient`] and by the instrumented
/// [`ObservedClient`](crate::observed::ObservedClient); callers hold an
/// `Arc<dyn Client>` and cannot tell the two apart.
#[async_trait]
pub trait Client: Send + Sync {
    /// Transfer a raw LSIF upload to the bundle manager.
    async fn send_upload(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError>;

    /// Retrieve a raw LSIF upload into a new randomly named file inside `dir`.
    ///
    /// Returns the path of the created file; the caller owns it.
    async fn get_upload(&self, bundle_id: BundleId, dir: &Path) -> Result<PathBuf, ClientError>;

    /// Transfer a converted database to the bundle manager.
    async fn send_db(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError>;

    /// Run `op` against one bundle's database and return the decoded JSON body.
    async fn query_bundle(
        &self,
        bundle_id: BundleId,
        op: &str,
        params: &QueryParams,
    ) -> Result<Value, ClientError>;
}

/// reqwest-backed [`Client`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
    limiter: Limiter,
    user_agent: String,
}

impl HttpClient {
    /// Build a client for `base_url` with default pool and limiter sizes.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::from_config(&BundleManagerConfig {
            url: base_url.into(),
            ..BundleManagerConfig::default()
        })
    }

    /// Build a client from the `[bundle_manager]` configuration section.
    pub fn from_config(config: &BundleManagerConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(config.max_idle_per_host);
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let http = builder.build()?;

        Ok(Self::with_http(
            config.url.clone(),
            http,
            Limiter::new(config.max_concurrent_requests),
        ))
    }

    /// Assemble a client from an existing reqwest client and limiter.
    pub fn with_http(base_url: impl Into<String>, http: reqwest::Client, limiter: Limiter) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            limiter,
            user_agent: process_user_agent(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Send one request and return the response if it was a 2xx.
    ///
    /// The limiter slot is released as soon as the response headers arrive,
    /// before the body is consumed.
    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        body: Option<reqwest::Body>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.user_agent);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = {
            let _permit = self.limiter.acquire().await?;
            debug!("acquired request limiter");
            request.send().await?
        };

        let status = response.status();
        if !status.is_success() {
            drop(response);
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn post_stream(&self, path: String, body: ByteStream) -> Result<(), ClientError> {
        let url = make_url(&self.base_url, &path, &QueryParams::new())?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(body));
        self.dispatch(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    async fn download(&self, bundle_id: BundleId, dir: &Path) -> Result<PathBuf, ClientError> {
        let url = make_url(&self.base_url, &format!("uploads/{}", bundle_id), &QueryParams::new())?;
        let response = self.dispatch(Method::GET, url, None).await?;

        let path = dir.join(uuid::Uuid::new_v4().to_string());
        let mut file = tokio::fs::File::create(&path).await?;

        let copied: Result<(), ClientError> = async {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(path)
    }

    async fn query(
        &self,
        bundle_id: BundleId,
        op: &str,
        params: &QueryParams,
    ) -> Result<Value, ClientError> {
        let url = make_bundle_url(&self.base_url, bundle_id, op, params)?;
        let response = self.dispatch(Method::GET, url, None).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn send_upload(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError> {
        let span = info_span!("client.send_upload", %bundle_id, error = field::Empty);
        let result = self
            .post_stream(format!("uploads/{}", bundle_id), body)
            .instrument(span.clone())
            .await;
        record_error(&span, &result);
        result
    }

    async fn get_upload(&self, bundle_id: BundleId, dir: &Path) -> Result<PathBuf, ClientError> {
        let span = info_span!("client.get_upload", %bundle_id, error = field::Empty);
        let result = self.download(bundle_id, dir).instrument(span.clone()).await;
        record_error(&span, &result);
        result
    }

    async fn send_db(&self, bundle_id: BundleId, body: ByteStream) -> Result<(), ClientError> {
        let span = info_span!("client.send_db", %bundle_id, error = field::Empty);
        let result = self
            .post_stream(format!("dbs/{}", bundle_id), body)
            .instrument(span.clone())
            .await;
        record_error(&span, &result);
        result
    }

    async fn query_bundle(
        &self,
        bundle_id: BundleId,
        op: &str,
        params: &QueryParams,
    ) -> Result<Value, ClientError> {
        let span = info_span!("client.query_bundle", %bundle_id, op, error = field::Empty);
        let result = self
            .query(bundle_id, op, params)
            .instrument(span.clone())
            .await;
        record_error(&span, &result);
        result
    }
}

pub(crate) fn record_error<T>(span: &Span, result: &Result<T, ClientError>) {
    if let Err(e) = result {
        span.record("error", field::display(e));
    }
}

/// User agent sent with every request: the invoking executable's file name.
fn process_user_agent() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// Join `path` onto `base_url` and attach `params` as the query string.
fn make_url(base_url: &str, path: &str, params: &QueryParams) -> Result<Url, ClientError> {
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}

fn make_bundle_url(
    base_url: &str,
    bundle_id: BundleId,
    op: &str,
    params: &QueryParams,
) -> Result<Url, ClientError> {
    make_url(base_url, &format!("dbs/{}/{}", bundle_id, op), params)
}
