//! HTTP/SSE implementation of the client contracts.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::HttpWorkflowClient;
pub use config::HttpClientConfig;
