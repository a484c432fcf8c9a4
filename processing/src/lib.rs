//!
//! Asynchronous document transformation
//!
//! Inbound documents are buffered into compressed spill files while the caller's stream is still open, then
//! transformed into RDF by an [`ExtractionEngine`](services::ExtractionEngine) on a bounded pool of workers. When no
//! worker is available, requests are rejected right away instead of being queued.
//!
//! The outcome of every scheduled request is reported exactly once to a [`CallbackHandler`].
//!
#![warn(missing_docs)]

mod callback;
mod document_uri;
mod entity;
mod error;
mod job;
mod pool;
mod registry;
mod transformer;

pub use callback::*;
pub use document_uri::*;
pub use entity::*;
pub use error::*;
pub use job::TransformationJob;
pub use pool::{PoolConfig, Task, WorkerPool, CORE_POOL_SIZE, KEEP_ALIVE_TIME, MAX_POOL_SIZE};
pub use registry::*;
pub use transformer::*;
