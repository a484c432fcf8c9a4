//!
//! Provides the external collaborators used for transforming documents.
//!
#![warn(missing_docs)]

use std::ffi::OsStr;
use std::fmt;
use std::fmt::Formatter;
use std::io::{Read, Write};
use std::process::{ExitStatus, Stdio};

use anyhow::{anyhow, Error};
use lazy_static::lazy_static;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::join;

mod command_extractor;
mod config;
mod extraction;
/// Media types accepted and produced by the transformation.
///
pub mod media;
mod writer;

pub use command_extractor::*;
pub use config::*;
pub use extraction::*;
pub use writer::*;

const CHUNK_SIZE: usize = 64 * 1024;

lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");
}

/// Global asynchronous runtime used to drive external programs from synchronous callers.
///
pub fn runtime() -> &'static tokio::runtime::Runtime {
    &RUNTIME
}

/// Error type for when a command execution fails.
///
#[derive(Debug)]
pub enum CommandError<E = Error> {
    /// When the command fails before exiting, such as if the child fails to spawn.
    ///
    PreExit(E),

    /// When the command fails after exiting, such as if the child exits with a non-zero status
    /// or the I/O streams encountered a problem during execution.
    ///
    PostExit(ExitStatus, E),
}

impl CommandError {
    /// Short-hand for creating a [`CommandError::PreExit`].
    ///
    /// Useful to pass in as a function handler to mapping functions (i.e. `map_err`).
    ///
    pub fn pre_exit(err: impl Into<Error>) -> Self {
        CommandError::PreExit(err.into())
    }

    /// Short-hand for creating a [`CommandError::PostExit`].
    ///
    /// Useful to pass in as a function handler to mapping functions (i.e. `map_err`).
    ///
    pub fn post_exit(status: ExitStatus, err: impl Into<Error>) -> Self {
        CommandError::PostExit(status, err.into())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (code, error) = match self {
            CommandError::PreExit(err) => ("".to_string(), err),
            CommandError::PostExit(status, err) => (
                status.code()
                    .map(|code| format!(" (code {})", code))
                    .unwrap_or("".to_string()),
                err
            )
        };

        write!(f, "{}{}", error, code)
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let error = match self {
            CommandError::PreExit(err) => err,
            CommandError::PostExit(_, err) => err,
        };
        Some(error.as_ref())
    }
}

fn trim_to_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .replace('\u{0}', "")
        .trim()
        .to_string()
}

/// Feeds a synchronous reader into an asynchronous writer, closing the writer at the end.
///
async fn feed<R, W>(mut reader: R, writer: Option<W>) -> anyhow::Result<()>
where
    R: Read,
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.ok_or_else(|| anyhow!("stdin of child is not available"))?;
    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buf[..bytes_read]).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

/// Drains an asynchronous reader into a synchronous writer.
///
async fn drain<R, W>(reader: Option<R>, writer: &mut W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: Write + ?Sized,
{
    if let Some(mut reader) = reader {
        let mut buf = vec![0; CHUNK_SIZE];
        loop {
            let bytes_read = reader.read(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buf[..bytes_read])?;
        }
    }
    Ok(())
}

/// Run a command and return the exit status.
///
/// This function streams the input into stdin, stdout to the output, and stderr to the error.
///
/// # Arguments
///
/// * `program` - The program to run.
/// * `arguments` - The arguments to pass to the program.
/// * `input` - A reader to stream into stdin.
/// * `output` - A writer to stream stdout into.
/// * `error` - A writer to stream stderr into.
///
/// # Returns
///
/// If the program exited successfully, the exit status is returned.
///
/// Otherwise, a [`CommandError`] is returned, and here are the possible implications:
/// 1. The function errored out before the command finished, so the exit status is [`None`] and the error will be populated
/// 2. The command finished, but an I/O error occurred while streaming, so the exit status and error will be populated
/// 2. The command finished, but the exit status was non-zero, so the exit status and error will be populated
///
/// For all errors that have an exit status, `error` will have the `stderr` from the command.
///
pub(crate) async fn stream_command<R, W, E>(
    program: impl AsRef<OsStr>,
    arguments: impl IntoIterator<Item=impl AsRef<OsStr>>,
    input: R,
    output: &mut W,
    error: &mut E,
) -> Result<ExitStatus, CommandError>
    where
        R: Read,
        W: Write + ?Sized,
        E: Write + ?Sized,
{
    let mut proc = tokio::process::Command::new(program.as_ref())
        .args(arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(CommandError::pre_exit)?;

    let writing = feed(input, proc.stdin.take());
    let reading = drain(proc.stdout.take(), output);
    let erroring = drain(proc.stderr.take(), error);

    // Don't `try_join!` to allow the error buffer to be written to completion
    let (writing_res, reading_res, erroring_res) = join!(writing, reading, erroring);
    let exit_status = proc.wait().await
        .map_err(CommandError::pre_exit)?;

    if !exit_status.success() {
        return Err(CommandError::post_exit(exit_status, anyhow!("command failed with non-zero exit status")));
    }

    // Resolve the results after the process finishes to get the `ExitStatus`
    writing_res.and(reading_res).and(erroring_res)
        .map_err(|err| CommandError::post_exit(exit_status, err))?;

    Ok(exit_status)
}
