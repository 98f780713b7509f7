//! Per-bundle query facade.
//!
//! A [`BundleClient`] binds one [`BundleId`] to a shared [`Client`] and
//! forwards every query through [`Client::query_bundle`]. It owns nothing
//! but an `Arc` to the client, so it is cheap to create per request. Built
//! on an [`ObservedClient`](crate::observed::ObservedClient), its queries are
//! instrumented like any other call.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::client::{Client, QueryParams};
use crate::error::ClientError;
use crate::models::{BundleId, Hover, Location};

#[derive(Clone)]
pub struct BundleClient {
    client: Arc<dyn Client>,
    bundle_id: BundleId,
}

impl BundleClient {
    pub fn new(client: Arc<dyn Client>, bundle_id: BundleId) -> Self {
        Self { client, bundle_id }
    }

    pub fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }

    /// Run `op` against this bundle and decode the response into `T`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        op: &str,
        params: &QueryParams,
    ) -> Result<T, ClientError> {
        let value = self.client.query_bundle(self.bundle_id, op, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Whether `path` exists in the bundle.
    pub async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        self.query("exists", &path_params(path)).await
    }

    pub async fn definitions(
        &self,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ClientError> {
        self.query("definitions", &position_params(path, line, character))
            .await
    }

    pub async fn references(
        &self,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ClientError> {
        self.query("references", &position_params(path, line, character))
            .await
    }

    /// Hover text at a position. The bundle manager answers `null` when
    /// there is none.
    pub async fn hover(
        &self,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>, ClientError> {
        self.query("hover", &position_params(path, line, character))
            .await
    }
}

impl std::fmt::Debug for BundleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleClient")
            .field("bundle_id", &self.bundle_id)
            .finish_non_exhaustive()
    }
}

fn path_params(path: &str) -> QueryParams {
    let mut params = QueryParams::new();
    params.insert("path".to_string(), path.to_string());
    params
}

fn position_params(path: &str, line: u32, character: u32) -> QueryParams {
    let mut params = path_params(path);
    params.insert("line".to_string(), line.to_string());
    params.insert("character".to_string(), character.to_string());
    params
}
