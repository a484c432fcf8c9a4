use std::fmt;
use std::fs::File;
use std::io;
use std::io::{BufReader, Read};
use std::path::Path;

use bytesize::{ByteSize, MB};
use flate2::read::GzDecoder;
use log::{debug, warn};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_stream::StreamExt;

use crate::spill::SpillWriter;
use crate::{ByteStream, DocumentSource, SyncReader};

const CHUNK_SIZE: usize = MB as usize;

/// A replayable, compressed copy of an inbound document.
///
/// The buffer is populated exactly once while it's being created, and is read-only afterwards.
/// Its spill file is owned by this buffer alone and is deleted by `release`, or when the buffer is dropped.
///
pub struct ContentBuffer {
    id: String,
    media_type: String,
    document_uri: String,
    length: u64,
    spill: Option<TempPath>,
}

impl ContentBuffer {
    /// Drains `source` into a new buffer spilled to the system temporary directory.
    ///
    /// See [`ContentBuffer::create_in`].
    ///
    pub fn create(
        id: impl Into<String>,
        source: impl Read,
        media_type: impl Into<String>,
        document_uri: impl Into<String>,
    ) -> io::Result<Self> {
        Self::create_in(std::env::temp_dir(), id, source, media_type, document_uri)
    }

    /// Drains `source` into a new buffer spilled to `dir`.
    ///
    /// The source is read to its end before this returns, so the caller is free to close it afterwards.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory to create the spill file in.
    /// * `id` - Identifier of the request the content belongs to.
    /// * `source` - The inbound content.
    /// * `media_type` - The declared media type of the content.
    /// * `document_uri` - The logical URI of the document.
    ///
    /// # Returns
    ///
    /// * `Ok(ContentBuffer)` - If all content was spilled successfully.
    /// * `Err(_)` - If reading the source or writing the spill failed. No spill file is left behind.
    ///
    pub fn create_in(
        dir: impl AsRef<Path>,
        id: impl Into<String>,
        mut source: impl Read,
        media_type: impl Into<String>,
        document_uri: impl Into<String>,
    ) -> io::Result<Self> {
        let id = id.into();
        let mut writer = SpillWriter::new(dir.as_ref(), &id)?;
        writer.copy_from(&mut source)?;
        let (spill, length) = writer.finish()?;
        Ok(Self::from_spill(id, spill, length, media_type.into(), document_uri.into()))
    }

    /// Drains an asynchronous `source` into a new buffer spilled to `dir`.
    ///
    /// Behaves like [`ContentBuffer::create_in`]. Compressing and writing the spill runs on tokio's blocking threads,
    /// so it has to be called from within a tokio runtime.
    ///
    pub async fn create_async<R>(
        dir: impl AsRef<Path>,
        id: impl Into<String>,
        mut source: R,
        media_type: impl Into<String>,
        document_uri: impl Into<String>,
    ) -> io::Result<Self>
        where R: AsyncRead + Unpin
    {
        let id = id.into();
        let mut writer = create_spill_blocking(dir.as_ref(), &id).await?;

        let mut buf = vec![0; CHUNK_SIZE];
        loop {
            let bytes_read = source.read(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            (writer, buf) = blocking(move || {
                writer.write_chunk(&buf[..bytes_read])?;
                Ok((writer, buf))
            }).await?;
        }

        let (spill, length) = blocking(move || writer.finish()).await?;
        Ok(Self::from_spill(id, spill, length, media_type.into(), document_uri.into()))
    }

    /// Drains a stream of bytes into a new buffer spilled to `dir`.
    ///
    /// Behaves like [`ContentBuffer::create_async`].
    ///
    pub async fn create_from_stream(
        dir: impl AsRef<Path>,
        id: impl Into<String>,
        mut stream: ByteStream,
        media_type: impl Into<String>,
        document_uri: impl Into<String>,
    ) -> io::Result<Self> {
        let id = id.into();
        let mut writer = create_spill_blocking(dir.as_ref(), &id).await?;

        while let Some(bytes) = stream.next().await {
            writer = blocking(move || {
                writer.write_chunk(&bytes)?;
                Ok(writer)
            }).await?;
        }

        let (spill, length) = blocking(move || writer.finish()).await?;
        Ok(Self::from_spill(id, spill, length, media_type.into(), document_uri.into()))
    }

    fn from_spill(id: String, spill: TempPath, length: u64, media_type: String, document_uri: String) -> Self {
        debug!(" - spilled {} from request {} into {}", ByteSize(length), id, spill.display());

        Self {
            id,
            media_type,
            document_uri,
            length,
            spill: Some(spill),
        }
    }

    /// Identifier of the request this content belongs to.
    ///
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Length in bytes of the original, uncompressed content.
    ///
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the original content was empty.
    ///
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Path of the spill file, or `None` once released.
    ///
    pub fn spill_path(&self) -> Option<&Path> {
        self.spill.as_deref()
    }

    /// Whether the spill has been deleted.
    ///
    pub fn is_released(&self) -> bool {
        self.spill.is_none()
    }

    /// Deletes the spill file.
    ///
    /// Calling this more than once is harmless; only the first call does any work.
    ///
    pub fn release(&mut self) -> io::Result<()> {
        match self.spill.take() {
            Some(spill) => {
                debug!(" - clean {}", spill.display());
                spill.close()
            }
            None => Ok(()),
        }
    }
}

/// Runs blocking spill work on tokio's blocking threads.
///
/// If the calling future is dropped, the work still runs to completion, and whatever it owns is dropped there.
///
async fn blocking<T, F>(work: F) -> io::Result<T>
    where
        F: FnOnce() -> io::Result<T> + Send + 'static,
        T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}

async fn create_spill_blocking(dir: &Path, id: &str) -> io::Result<SpillWriter> {
    let dir = dir.to_path_buf();
    let id = id.to_string();
    blocking(move || SpillWriter::new(&dir, &id)).await
}

impl DocumentSource for ContentBuffer {
    fn open_stream(&self) -> io::Result<SyncReader> {
        let spill = self.spill.as_ref().ok_or_else(|| io::Error::new(
            io::ErrorKind::NotFound,
            format!("content of request {} was already released", self.id),
        ))?;
        let file = File::open(spill)?;
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    }

    fn content_type(&self) -> &str {
        &self.media_type
    }

    fn content_length(&self) -> u64 {
        self.length
    }

    fn document_uri(&self) -> &str {
        &self.document_uri
    }
}

impl Drop for ContentBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Unable to clean content of request {}: {}", self.id, err);
        }
    }
}

impl fmt::Debug for ContentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentBuffer")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("document_uri", &self.document_uri)
            .field("length", &self.length)
            .field("spill", &self.spill.as_deref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use pretty_assertions::assert_eq;
    use test_utils::{count_files_with_extension, random_bytes, string_as_byte_stream};

    use crate::SPILL_EXTENSION;

    use super::*;

    fn read_all(buffer: &ContentBuffer) -> anyhow::Result<Vec<u8>> {
        let mut data = vec![];
        buffer.open_stream()?.read_to_end(&mut data)?;
        Ok(data)
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
        }
    }

    struct FailingAsyncReader;

    impl AsyncRead for FailingAsyncReader {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")))
        }
    }

    #[test]
    fn test_open_stream_replays_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let expected = random_bytes(3 * CHUNK_SIZE + 17);

        let buffer = ContentBuffer::create_in(
            dir.path(),
            "replay",
            Cursor::new(expected.to_vec()),
            "text/html",
            "http://example.org/replay",
        )?;

        assert_eq!(read_all(&buffer)?, *expected);
        assert_eq!(read_all(&buffer)?, *expected);
        assert_eq!(buffer.len(), expected.len() as u64);
        Ok(())
    }

    #[test]
    fn test_empty_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let buffer = ContentBuffer::create_in(dir.path(), "empty", io::empty(), "text/csv", "urn:x")?;

        assert!(buffer.is_empty());
        assert!(read_all(&buffer)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_metadata() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let buffer = ContentBuffer::create_in(
            dir.path(),
            "meta",
            &b"a,b\n1,2\n"[..],
            "text/csv",
            "http://example.org/meta",
        )?;

        assert_eq!(buffer.id(), "meta");
        assert_eq!(buffer.content_type(), "text/csv");
        assert_eq!(buffer.document_uri(), "http://example.org/meta");
        assert_eq!(buffer.content_length(), 8);
        assert!(buffer.is_local());
        Ok(())
    }

    #[test]
    fn test_compresses_text() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let text = "<p>hello, world</p>\n".repeat(10_000);
        let buffer = ContentBuffer::create_in(dir.path(), "html", text.as_bytes(), "text/html", "urn:x")?;

        let spill_len = std::fs::metadata(buffer.spill_path().unwrap())?.len();
        assert!(spill_len < buffer.len() / 10);
        Ok(())
    }

    #[test]
    fn test_release_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut buffer = ContentBuffer::create_in(dir.path(), "release", &b"data"[..], "text/csv", "urn:x")?;
        assert_eq!(count_files_with_extension(dir.path(), SPILL_EXTENSION)?, 1);

        buffer.release()?;
        buffer.release()?;

        assert!(buffer.is_released());
        assert_eq!(count_files_with_extension(dir.path(), SPILL_EXTENSION)?, 0);
        assert!(buffer.open_stream().is_err());
        Ok(())
    }

    #[test]
    fn test_drop_releases() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let buffer = ContentBuffer::create_in(dir.path(), "dropped", &b"data"[..], "text/csv", "urn:x")?;
        drop(buffer);

        assert_eq!(count_files_with_extension(dir.path(), SPILL_EXTENSION)?, 0);
        Ok(())
    }

    #[test]
    fn test_failed_ingestion_leaves_no_spill() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = ContentBuffer::create_in(dir.path(), "failing", FailingReader, "text/csv", "urn:x");

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(count_files_with_extension(dir.path(), SPILL_EXTENSION)?, 0);
        Ok(())
    }

    #[test]
    fn test_spills_are_not_shared() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = ContentBuffer::create_in(dir.path(), "same-id", &b"one"[..], "text/csv", "urn:x")?;
        let second = ContentBuffer::create_in(dir.path(), "same-id", &b"two"[..], "text/csv", "urn:x")?;

        assert_ne!(first.spill_path(), second.spill_path());
        assert_eq!(read_all(&first)?, b"one");
        assert_eq!(read_all(&second)?, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn test_create_async() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let expected = random_bytes(CHUNK_SIZE + 1);

        let buffer = ContentBuffer::create_async(
            dir.path(),
            "async",
            Cursor::new(expected.to_vec()),
            "text/turtle",
            "urn:x",
        ).await?;

        assert_eq!(buffer.len(), expected.len() as u64);
        assert_eq!(read_all(&buffer)?, *expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_async_ingestion_leaves_no_spill() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = AsyncReadExt::chain(Cursor::new(b"partial".to_vec()), FailingAsyncReader);

        let result = ContentBuffer::create_async(dir.path(), "failing", source, "text/csv", "urn:x").await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(count_files_with_extension(dir.path(), SPILL_EXTENSION)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_from_stream() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let stream = string_as_byte_stream("<html><body>streamed</body></html>");

        let buffer = ContentBuffer::create_from_stream(dir.path(), "stream", stream, "text/html", "urn:x").await?;

        assert_eq!(read_all(&buffer)?, b"<html><body>streamed</body></html>");
        assert_eq!(buffer.len(), 34);
        Ok(())
    }
}
