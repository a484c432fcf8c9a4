use std::ffi::OsString;

use anyhow::anyhow;
use log::{debug, warn};

use streaming::DocumentSource;

use crate::{config, runtime, stream_command, trim_to_string, CommandError, ExtractionConfig, ExtractionEngine, ExtractionError, ResultWriter};

const DEFAULT_PROGRAM: &str = "any23";

/// Extraction engine backed by an external program.
///
/// The decoded document is streamed into the program's stdin, and whatever the program writes to stdout becomes the
/// extraction result. After the configured arguments, the program receives:
///
/// ```text
/// --document-uri <uri> --media-type <type> --encoding <encoding> --validation-mode <mode> [--property <key>=<value>]...
/// ```
///
/// A non-zero exit status fails the extraction with the program's stderr as the message. If the program's output
/// can't be written to the result, the extraction fails with [`ExtractionError::Write`].
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    /// Creates an extractor running `program` with `args` in front of the per-document arguments.
    ///
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item=impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an extractor running the program named by `EXTRACTOR_PROGRAM`.
    ///
    pub fn from_config() -> Self {
        Self::new(config().get_or("EXTRACTOR_PROGRAM", DEFAULT_PROGRAM), Vec::<String>::new())
    }

    /// The program being run.
    ///
    pub fn program(&self) -> &str {
        &self.program
    }

    fn arguments(&self, config: &ExtractionConfig, source: &dyn DocumentSource, encoding: &str) -> Vec<OsString> {
        let mut arguments: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        arguments.extend([
            "--document-uri".into(), source.document_uri().into(),
            "--media-type".into(), source.content_type().into(),
            "--encoding".into(), encoding.into(),
            "--validation-mode".into(), config.validation_mode.to_string().into(),
        ]);
        for (key, value) in &config.properties {
            arguments.push("--property".into());
            arguments.push(format!("{}={}", key, value).into());
        }
        arguments
    }
}

impl ExtractionEngine for CommandExtractor {
    fn extract(
        &self,
        config: &ExtractionConfig,
        source: &dyn DocumentSource,
        writer: &mut ResultWriter,
        encoding: &str,
    ) -> Result<(), ExtractionError> {
        let arguments = self.arguments(config, source, encoding);
        debug!(" - run {} {:?}", self.program, arguments);

        let input = source.open_stream()?;
        let mut stderr = vec![];
        let result = runtime().block_on(
            stream_command(&self.program, arguments, input, writer, &mut stderr)
        );

        let stderr = trim_to_string(&stderr);
        match result {
            // The program may also have died from the closed pipe, so the sink failure takes precedence
            Err(err) if writer.has_failed() => Err(ExtractionError::Write(
                anyhow!("unable to write the output of {}: {}", self.program, err)
            )),
            Ok(_) => {
                if !stderr.is_empty() {
                    warn!("{} reported for {}: {}", self.program, source.document_uri(), stderr);
                }
                Ok(())
            }
            Err(CommandError::PreExit(err)) => Err(ExtractionError::Extraction(
                anyhow!("unable to run {}: {}", self.program, err)
            )),
            Err(err @ CommandError::PostExit(_, _)) => Err(ExtractionError::Extraction(
                anyhow!("{} failed: {}: {}", self.program, err, stderr)
            )),
        }
    }
}
