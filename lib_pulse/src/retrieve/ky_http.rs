//! # HTTP Retrieval Utilities
//!
//! An asynchronous JSON API client wrapper around `reqwest`, with exponential
//! backoff retries from `reqwest-retry` and a per-request timeout.

use std::time::Duration;

use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// A decoded API response with its transport metadata.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body on success.
    pub data: Option<T>,
    /// The raw body returned with a non-2xx status.
    pub error_body: Option<String>,
    pub status: u16,
    pub success: bool,
}

/// Tuning for `ApiClient`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Retries after the first attempt for transient failures (5xx, timeouts).
    pub max_retries: u32,
    /// Whole-request timeout, per attempt.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 1,
            timeout: Duration::from_secs(10),
            user_agent: concat!("opspulse/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A JSON API client rooted at a base URL.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client with transient-failure retries.
    ///
    /// # Arguments
    /// * `base_url` - Absolute root of the API. Keep its trailing slash so
    ///   relative paths join beneath it.
    /// * `options` - Timeout, retry count and user agent.
    ///
    /// # Errors
    /// Returns `FetchError` if `base_url` does not parse or the underlying
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)?;

        // Exponential backoff on connection errors and 5xx/429 responses
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent)
            .build()?;

        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request against `path` (relative to the base URL).
    ///
    /// Non-2xx statuses are not errors here; they come back with
    /// `success == false` and the raw body in `error_body`. A 2xx body that
    /// does not decode as `T` is a `FetchError::Decode`.
    ///
    /// # Arguments
    /// * `method` - The HTTP method.
    /// * `path` - Path relative to the base URL, e.g. "stats/overview".
    ///
    /// # Errors
    /// Returns `FetchError` for an unjoinable path, a transport failure that
    /// outlasted the retries, or an undecodable success body.
    pub async fn request<T>(&self, method: Method, path: &str) -> Result<ApiResponse<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        // 1. Construct the full absolute URL
        let full_url = self.base_url.join(path)?;

        // 2. Execute the request through the retry middleware
        let response = self.inner.request(method, full_url).send().await?;
        let status = response.status();

        // 3. Decode success bodies, keep error bodies as raw text
        if status.is_success() {
            let text = response.text().await?;
            let data = serde_json::from_str::<T>(&text).map_err(|e| FetchError::Decode {
                resource: path.to_string(),
                reason: e.to_string(),
            })?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }

    /// GETs `path` and requires a decoded 2xx body.
    ///
    /// # Errors
    /// Everything `request` returns, plus `FetchError::Status` for a non-2xx
    /// response.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let response = self.request::<T>(Method::GET, path).await?;
        if !response.success {
            return Err(FetchError::Status {
                resource: path.to_string(),
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }
        response.data.ok_or_else(|| FetchError::EmptyBody(path.to_string()))
    }
}
