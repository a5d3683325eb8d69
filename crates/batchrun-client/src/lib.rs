//! Client side of the batch runner: the streaming task-submission contract
//! and an HTTP/SSE implementation of it.
//!
//! ```no_run
//! use batchrun_client::prelude::*;
//! use futures::StreamExt as _;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = HttpWorkflowClient::from_env()?;
//! let mut handle = client
//!     .open_stream(TaskRequest {
//!         target: SubmitTarget::workflow("wf-1", "demo"),
//!         inputs: serde_json::Map::new(),
//!         batch_index: 1,
//!         batch_total: 1,
//!     })
//!     .await?;
//! while let Some(event) = handle.stream.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

/// Client traits and the open stream handle.
pub mod client;
/// Public error type.
pub mod errors;
/// HTTP/SSE client.
pub mod http;
/// Common imports.
pub mod prelude;
/// Request and response payloads.
pub mod request;
/// Task stream events.
pub mod stream;

pub use client::{DebugControl, RunLogSink, TaskEventStream, TaskStreamClient, TaskStreamHandle};
pub use errors::ClientError;
pub use http::{HttpClientConfig, HttpWorkflowClient};
pub use request::{DebugStatus, RunLogEntry, SubmitTarget, TaskRequest};
pub use stream::TaskStreamEvent;
