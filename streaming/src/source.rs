use std::io;

use crate::SyncReader;

/// A document handed to an extraction engine.
///
/// The content can be read more than once: every call to `open_stream` starts again at the first byte.
///
pub trait DocumentSource: Send + Sync {
    /// Opens a fresh reader positioned at the start of the original (uncompressed) content.
    ///
    fn open_stream(&self) -> io::Result<SyncReader>;

    /// The declared media type of the content.
    ///
    fn content_type(&self) -> &str;

    /// Length in bytes of the original content.
    ///
    fn content_length(&self) -> u64;

    /// The logical URI the document is extracted under.
    ///
    fn document_uri(&self) -> &str;

    /// Whether the content is available locally, without further network access.
    ///
    fn is_local(&self) -> bool {
        true
    }
}
