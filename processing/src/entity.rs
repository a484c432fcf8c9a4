use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempPath;

use streaming::SpillArea;

const RESULT_PREFIX: &str = "result-";

/// Extension of the files backing a [`ResultEntity`].
///
pub const RESULT_EXTENSION: &str = "ttl";

/// The serialized outcome of a successful transformation.
///
/// The content lives in a temporary file that is deleted when the entity is dropped, so the callback that receives it
/// decides how long the result is kept around. Until then, the entity also keeps the spill area holding that file.
///
pub struct ResultEntity {
    id: String,
    media_type: String,
    path: TempPath,
    _area: Arc<SpillArea>,
}

impl ResultEntity {
    /// Creates an empty entity in `area`, returning it together with a handle to write its content.
    ///
    pub(crate) fn create(area: &Arc<SpillArea>, id: &str, media_type: &str) -> io::Result<(Self, File)> {
        let file = tempfile::Builder::new()
            .prefix(RESULT_PREFIX)
            .suffix(&format!(".{}", RESULT_EXTENSION))
            .tempfile_in(area.path())?;
        let sink = file.as_file().try_clone()?;

        Ok((
            Self {
                id: id.to_string(),
                media_type: media_type.to_string(),
                path: file.into_temp_path(),
                _area: area.clone(),
            },
            sink,
        ))
    }

    /// Identifier of the request this result belongs to.
    ///
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media type of the content, including its charset.
    ///
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Location of the content. Only valid while the entity is alive.
    ///
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the content in bytes.
    ///
    pub fn len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Whether the transformation produced no content.
    ///
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Opens the content for reading.
    ///
    pub fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Reads the whole content as UTF-8.
    ///
    pub fn read_to_string(&self) -> io::Result<String> {
        let mut content = String::new();
        self.open()?.read_to_string(&mut content)?;
        Ok(content)
    }

    /// Copies the content to `destination`, returning the number of bytes copied.
    ///
    pub fn copy_to(&self, destination: impl AsRef<Path>) -> io::Result<u64> {
        std::fs::copy(&self.path, destination)
    }
}

impl fmt::Debug for ResultEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultEntity")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("path", &self.path.display())
            .finish()
    }
}
