//!
//! Buffering of inbound document content.
//!
//! A request body is drained into a compressed spill file while the inbound transport stream is still open,
//! and can then be replayed from the start any number of times by whoever processes it later.
//!
#![warn(missing_docs)]

use std::io::Read;
use std::pin::Pin;

use bytes::Bytes;
use tokio_stream::Stream;

mod area;
mod buffer;
mod source;
mod spill;

pub use area::*;
pub use buffer::*;
pub use source::*;
pub use spill::*;

/// A representation of a stream of `bytes::Bytes`
///
/// Defines the type as a pointer to a stream that can be sent across threads and is sync and unpin.
///
pub type ByteStream = Pin<Box<dyn Stream<Item=Bytes> + Send + Sync>>;

/// A boxed, thread-safe synchronous reader.
///
pub type SyncReader = Box<dyn Read + Send>;
