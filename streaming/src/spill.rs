use std::fs::File;
use std::io;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::{NamedTempFile, TempPath};
use uuid::Uuid;

/// File extension given to every spill file.
///
pub const SPILL_EXTENSION: &str = "entity";

const MIN_PREFIX_LEN: usize = 3;
const MAX_PREFIX_LEN: usize = 64;

/// Writes content into a gzip-compressed temporary file while counting the uncompressed bytes.
///
/// The temporary file is removed if the writer is dropped before `finish` is called.
///
pub(crate) struct SpillWriter {
    spill: NamedTempFile,
    encoder: GzEncoder<BufWriter<File>>,
    length: u64,
}

impl SpillWriter {
    pub(crate) fn new(dir: &Path, id: &str) -> io::Result<Self> {
        let spill = tempfile::Builder::new()
            .prefix(&spill_prefix(id))
            .suffix(&format!(".{}", SPILL_EXTENSION))
            .tempfile_in(dir)?;
        let file = spill.as_file().try_clone()?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

        Ok(Self { spill, encoder, length: 0 })
    }

    pub(crate) fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.encoder.write_all(chunk)?;
        self.length += chunk.len() as u64;
        Ok(())
    }

    pub(crate) fn copy_from(&mut self, source: &mut impl Read) -> io::Result<()> {
        self.length += io::copy(source, &mut self.encoder)?;
        Ok(())
    }

    /// Flushes the compressed stream and hands over ownership of the spill file.
    ///
    /// Returns the spill path and the number of uncompressed bytes written.
    ///
    pub(crate) fn finish(self) -> io::Result<(TempPath, u64)> {
        let mut inner = self.encoder.finish()?;
        inner.flush()?;
        Ok((self.spill.into_temp_path(), self.length))
    }
}

fn spill_prefix(id: &str) -> String {
    if id.chars().count() < MIN_PREFIX_LEN {
        return Uuid::new_v4().to_string();
    }
    id.chars()
        .take(MAX_PREFIX_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
