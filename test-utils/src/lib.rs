//!
//! # Test Utilities
//!
#![warn(missing_docs)]

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tokio_stream::Stream;

// Define the same type alias as found in `streaming/src/lib.rs`, as importing that crate here
// would create a circular dependency.
type ByteStream = Pin<Box<dyn Stream<Item=Bytes> + Send + Sync>>;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Creates `len` random bytes.
///
pub fn random_bytes(len: usize) -> Box<Vec<u8>> {
    let mut rng = rand::thread_rng();
    Box::new((0..len).map(|_| rng.gen()).collect::<Vec<u8>>())
}

/// Creates a stream yielding `value` as a single chunk.
///
pub fn string_as_byte_stream(value: impl Into<String>) -> ByteStream {
    let bytes = Bytes::from(value.into());
    Box::pin(async_stream::stream! { yield bytes })
}

/// Counts the files below `dir` with the given extension, including those in subdirectories.
///
/// Subdirectories that disappear while counting are skipped.
///
pub fn count_files_with_extension(dir: impl AsRef<Path>, extension: &str) -> io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            count += match count_files_with_extension(&path, extension) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
                counted => counted?,
            };
        } else if path.is_file() && path.extension().map_or(false, |ext| ext == extension) {
            count += 1;
        }
    }
    Ok(count)
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
///
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
