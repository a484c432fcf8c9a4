use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use log::{debug, info, warn};

use services::{media, ExtractionConfig, ExtractionEngine, ResultWriter};
use streaming::{ContentBuffer, DocumentSource, SpillArea};

use crate::pool::panic_message;
use crate::{ActiveRequests, CallbackHandler, JobState, ResultEntity, TransformError};

/// Everything a job needs besides its own content, shared by all jobs of one transformer.
///
pub(crate) struct JobContext {
    pub(crate) instance: u64,
    pub(crate) engine: Arc<dyn ExtractionEngine>,
    pub(crate) extraction: Arc<ExtractionConfig>,
    pub(crate) active: Arc<ActiveRequests>,
    pub(crate) callback: Arc<dyn CallbackHandler>,
    pub(crate) area: Arc<SpillArea>,
}

/// A single scheduled transformation of a buffered document.
///
/// Jobs are identified by the transformer that created them together with their request id.
///
pub struct TransformationJob {
    id: String,
    buffer: ContentBuffer,
    context: Arc<JobContext>,
    state: JobState,
}

impl TransformationJob {
    pub(crate) fn new(buffer: ContentBuffer, context: Arc<JobContext>) -> Self {
        Self {
            id: buffer.id().to_string(),
            buffer,
            context,
            state: JobState::Queued,
        }
    }

    /// Identifier of the request being transformed.
    ///
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    ///
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Transforms the buffered document and reports the outcome.
    ///
    /// Whatever happens during extraction, the result writer is closed, the buffered content is released and the
    /// request is removed from the active set before the callback is invoked exactly once.
    ///
    /// Returns the terminal state of the job.
    ///
    pub fn run(mut self) -> JobState {
        info!("> transform Entity[id: {} | uri: {} | type: {}]", self.id, self.buffer.document_uri(), self.buffer.content_type());
        let start = Instant::now();
        self.state = JobState::Running;
        self.context.active.mark_running(&self.id);

        let outcome = self.extract();

        if let Err(err) = self.buffer.release() {
            warn!("Unable to release content of {}: {}", self.id, err);
        }
        self.context.active.unregister(&self.id);

        let elapsed = start.elapsed().as_millis();
        match outcome {
            Ok(entity) => {
                self.state = JobState::Succeeded;
                debug!(" - transformed {} in {}ms", self.id, elapsed);
                self.context.callback.response_available(&self.id, entity);
            }
            Err(err) => {
                self.state = JobState::Failed;
                warn!("Unable to transform {} after {}ms: {}", self.id, elapsed, err);
                self.context.callback.report_failure(&self.id, err);
            }
        }
        self.state
    }

    fn extract(&self) -> Result<ResultEntity, TransformError> {
        let (entity, sink) = ResultEntity::create(&self.context.area, &self.id, media::OUTPUT)
            .map_err(|err| TransformError::Write(anyhow!("unable to create result for {}: {}", self.id, err)))?;
        let mut writer = ResultWriter::new(sink);

        let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
            self.context.engine.extract(&self.context.extraction, &self.buffer, &mut writer, media::OUTPUT_ENCODING)
        }));
        let closed = writer.close();

        match extracted {
            Ok(Ok(())) => {
                closed?;
                Ok(entity)
            }
            Ok(Err(err)) => Err(err.into()),
            Err(panic) => Err(TransformError::Unexpected(
                anyhow!("extraction of {} panicked: {}", self.id, panic_message(panic.as_ref()))
            )),
        }
    }
}

impl PartialEq for TransformationJob {
    fn eq(&self, other: &Self) -> bool {
        self.context.instance == other.context.instance && self.id == other.id
    }
}

impl Eq for TransformationJob {}

impl Hash for TransformationJob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.instance.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for TransformationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationJob")
            .field("id", &self.id)
            .field("instance", &self.context.instance)
            .field("state", &self.state)
            .field("buffer", &self.buffer)
            .finish()
    }
}
