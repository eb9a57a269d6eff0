//! Snapshot fetching: the `SnapshotSource` seam and its HTTP implementation.

use std::future::Future;

use crate::error::FetchError;
use crate::models::{AnomalyRecord, EventRecord, StatsDelta, VolumeBucket};
use crate::retrieve::ky_http::{ApiClient, ClientOptions};

/// The four snapshot resources, fetched independently of each other.
pub trait SnapshotSource: Send + Sync {
    fn overview(&self) -> impl Future<Output = Result<StatsDelta, FetchError>> + Send;
    fn timeline(&self) -> impl Future<Output = Result<Vec<EventRecord>, FetchError>> + Send;
    fn anomalies(&self) -> impl Future<Output = Result<Vec<AnomalyRecord>, FetchError>> + Send;
    fn volume(&self) -> impl Future<Output = Result<Vec<VolumeBucket>, FetchError>> + Send;
}

/// Fetches snapshots from the producer gateway over HTTP.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: ApiClient,
}

impl HttpSnapshotSource {
    /// # Arguments
    /// * `base_url` - Root of the producer gateway, e.g. "http://127.0.0.1:3000/".
    /// * `options` - Passed through to the underlying `ApiClient`.
    ///
    /// # Errors
    /// Returns `FetchError` if the client cannot be built.
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self, FetchError> {
        Ok(Self {
            client: ApiClient::new(base_url, options)?,
        })
    }

    pub fn from_client(client: ApiClient) -> Self {
        Self { client }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn overview(&self) -> Result<StatsDelta, FetchError> {
        self.client.get_json("stats/overview").await
    }

    async fn timeline(&self) -> Result<Vec<EventRecord>, FetchError> {
        self.client.get_json("stats/timeline").await
    }

    async fn anomalies(&self) -> Result<Vec<AnomalyRecord>, FetchError> {
        self.client.get_json("stats/anomalies").await
    }

    async fn volume(&self) -> Result<Vec<VolumeBucket>, FetchError> {
        self.client.get_json("stats/volume").await
    }
}
