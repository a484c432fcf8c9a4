use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use streaming::DocumentSource;

use crate::writer::is_sink_failure;
use crate::ResultWriter;

/// How strictly the extraction engine validates the documents it reads.
///
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Documents are read as they are.
    ///
    None,

    /// Documents are validated, and invalid ones are reported.
    ///
    Validate,

    /// Documents are validated, and fixed where possible.
    ///
    #[default]
    ValidateAndFix,
}

impl ValidationMode {
    /// All validation modes.
    ///
    pub const ALL: [ValidationMode; 3] = [ValidationMode::None, ValidationMode::Validate, ValidationMode::ValidateAndFix];
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ValidationMode::None),
            "validate" => Ok(ValidationMode::Validate),
            "validateandfix" | "validate-and-fix" => Ok(ValidationMode::ValidateAndFix),
            _ => Err(format!("Can not convert {} to ValidationMode (supported: {:?})", s, Self::ALL)),
        }
    }
}

impl Display for ValidationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValidationMode::None => "None",
            ValidationMode::Validate => "Validate",
            ValidationMode::ValidateAndFix => "ValidateAndFix",
        };
        write!(f, "{}", name)
    }
}

/// Options handed unchanged to the extraction engine for every document.
///
/// `properties` override the engine's own defaults.
///
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Validation applied to every document.
    ///
    #[serde(default)]
    pub validation_mode: ValidationMode,

    /// Engine properties, by name.
    ///
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ExtractionConfig {
    /// Parses a configuration from TOML.
    ///
    /// ```toml
    /// validation_mode = "Validate"
    ///
    /// [properties]
    /// "extraction.metadata.nesting" = "off"
    /// ```
    ///
    pub fn from_toml_str(value: &str) -> anyhow::Result<Self> {
        toml::from_str(value).map_err(|err| anyhow!("invalid extraction configuration: {}", err))
    }

    /// Reads a TOML configuration file.
    ///
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("unable to read configuration file {}: {}", path.display(), err))?;
        Self::from_toml_str(&content)
    }

    /// Sets the validation mode.
    ///
    pub fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self
    }

    /// Returns the property named `key`, if set.
    ///
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Error raised by an extraction engine.
///
#[derive(Debug)]
pub enum ExtractionError {
    /// The document couldn't be extracted.
    ///
    Extraction(anyhow::Error),

    /// The extracted output couldn't be written.
    ///
    Write(anyhow::Error),

    /// Reading the document failed.
    ///
    /// I/O errors raised by a [`ResultWriter`] convert into [`ExtractionError::Write`] instead.
    ///
    Io(std::io::Error),

    /// The extraction was interrupted before it completed.
    ///
    Interrupted,
}

impl Display for ExtractionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction(err) => write!(f, "Extraction failed: {}", err),
            Self::Write(err) => write!(f, "Writing the extraction result failed: {}", err),
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Interrupted => write!(f, "Extraction was interrupted"),
        }
    }
}

impl std::error::Error for ExtractionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Extraction(err) | Self::Write(err) => Some(err.as_ref()),
            Self::Io(err) => Some(err),
            Self::Interrupted => None,
        }
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        if is_sink_failure(&err) {
            Self::Write(anyhow!(err))
        } else if err.kind() == std::io::ErrorKind::Interrupted {
            Self::Interrupted
        } else {
            Self::Io(err)
        }
    }
}

/// Extracts structured data from a document.
///
/// Implementations are called synchronously from worker threads and are required to be thread safe.
///
pub trait ExtractionEngine: Send + Sync {
    /// Extracts `source` and serializes the result into `writer`.
    ///
    /// # Arguments
    ///
    /// * `config` - Options for this extraction.
    /// * `source` - The document to extract. It can be opened more than once.
    /// * `writer` - Where to write the extracted output.
    /// * `encoding` - Character encoding of the output.
    ///
    fn extract(
        &self,
        config: &ExtractionConfig,
        source: &dyn DocumentSource,
        writer: &mut ResultWriter,
        encoding: &str,
    ) -> Result<(), ExtractionError>;
}
