//! # Data Retrieval Module
//!
//! Generic HTTP retrieval used by the consumer's snapshot client.
//!
//! - **`ky_http`**: `ApiClient`, a JSON client on `reqwest` and
//!   `reqwest-middleware` with exponential-backoff retries.

pub mod ky_http;
