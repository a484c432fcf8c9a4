use std::fmt::{Display, Formatter};
use std::io;
use std::io::{BufWriter, Write};

use anyhow::anyhow;
use log::{trace, warn};

use crate::ExtractionError;

type Sink = BufWriter<Box<dyn Write + Send>>;

/// Marks an I/O error as raised by the result sink, rather than by reading the document.
///
#[derive(Debug)]
struct SinkFailure(io::Error);

impl Display for SinkFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SinkFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Whether `err` was returned by a [`ResultWriter`].
///
pub(crate) fn is_sink_failure(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<SinkFailure>())
}

/// Buffered writer the extraction engine serializes its output into.
///
/// The writer is closed explicitly with `close` on the success path, which reports any failure to flush the sink.
/// On every other path it is closed when dropped.
///
/// I/O errors returned by `write` and `flush` are tagged, so that converting them into an [`ExtractionError`] yields
/// [`ExtractionError::Write`] rather than a failure to read the document.
///
pub struct ResultWriter {
    sink: Option<Sink>,
    written: u64,
    failed: bool,
}

impl ResultWriter {
    /// Creates a writer over `sink`.
    ///
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(BufWriter::new(Box::new(sink))),
            written: 0,
            failed: false,
        }
    }

    /// Number of bytes written so far.
    ///
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Whether writing to the sink failed at least once.
    ///
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Whether the writer was closed.
    ///
    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    /// Flushes all buffered output and releases the sink.
    ///
    /// Closing an already closed writer does nothing.
    ///
    pub fn close(&mut self) -> Result<(), ExtractionError> {
        match self.sink.take() {
            Some(mut sink) => {
                trace!(" - close result writer ({} bytes)", self.written);
                sink.flush().map_err(|err| {
                    self.failed = true;
                    ExtractionError::Write(anyhow!(err))
                })
            }
            None => Ok(()),
        }
    }

    fn sink(&mut self) -> io::Result<&mut Sink> {
        self.sink.as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "result writer is closed"))
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.failed = true;
        io::Error::new(err.kind(), SinkFailure(err))
    }
}

impl Write for ResultWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.sink()
            .and_then(|sink| sink.write(buf))
            .map_err(|err| self.fail(err))?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink()
            .and_then(|sink| sink.flush())
            .map_err(|err| self.fail(err))
    }
}

impl Drop for ResultWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Unable to close result writer: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn test_close_flushes() -> anyhow::Result<()> {
        let sink = SharedSink::default();
        let mut writer = ResultWriter::new(sink.clone());

        writer.write_all(b"<a> <b> <c> .\n")?;
        assert!(sink.contents().is_empty());

        writer.close()?;
        assert_eq!(sink.contents(), b"<a> <b> <c> .\n");
        assert_eq!(writer.written(), 14);
        assert!(writer.is_closed());
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent() -> anyhow::Result<()> {
        let mut writer = ResultWriter::new(SharedSink::default());
        writer.close()?;
        writer.close()?;
        Ok(())
    }

    #[test]
    fn test_write_after_close_fails() -> anyhow::Result<()> {
        let mut writer = ResultWriter::new(SharedSink::default());
        writer.close()?;

        let err = writer.write_all(b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        Ok(())
    }

    #[test]
    fn test_drop_flushes() {
        let sink = SharedSink::default();
        {
            let mut writer = ResultWriter::new(sink.clone());
            writer.write_all(b"dropped").unwrap();
        }
        assert_eq!(sink.contents(), b"dropped");
    }

    #[test]
    fn test_write_failure_converts_to_write_error() {
        let mut writer = ResultWriter::new(BrokenSink);

        let err = writer.write_all(&[b'x'; 65536]).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(writer.has_failed());

        match ExtractionError::from(err) {
            ExtractionError::Write(err) => assert_eq!(err.to_string(), "disk full"),
            other => panic!("expected write error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_failure_stays_io_error() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "truncated");
        assert!(matches!(ExtractionError::from(err), ExtractionError::Io(_)));
    }

    #[test]
    fn test_close_reports_write_failure() {
        let mut writer = ResultWriter::new(BrokenSink);
        writer.write_all(b"buffered").unwrap();

        let err = writer.close().unwrap_err();
        assert!(matches!(err, ExtractionError::Write(_)));
    }
}
