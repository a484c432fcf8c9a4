use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncRead;

use services::{config, media, ExtractionConfig, ExtractionEngine};
use streaming::{sweep_abandoned_areas, ContentBuffer, DocumentSource, SpillArea};

use crate::job::JobContext;
use crate::{document_uri, ActiveRequests, CallbackHandler, JobState, PoolConfig, TransformError, TransformationJob, WorkerPool};

const DEFAULT_SPILL_DIR: &str = "rdf-transformer-spill";

static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Metadata of an inbound transformation request.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Identifier of the request, unique among active requests.
    ///
    pub id: String,

    /// Declared media type of the content.
    ///
    pub media_type: String,

    /// Location the request declares for its content, if any.
    ///
    pub content_location: Option<String>,

    /// The URL the request was received on.
    ///
    pub request_url: String,
}

impl InboundRequest {
    /// Creates a request without a content location.
    ///
    pub fn new(id: impl Into<String>, media_type: impl Into<String>, request_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            media_type: media_type.into(),
            content_location: None,
            request_url: request_url.into(),
        }
    }

    /// Sets the location the request declares for its content.
    ///
    pub fn with_content_location(mut self, content_location: impl Into<String>) -> Self {
        self.content_location = Some(content_location.into());
        self
    }

    /// The logical URI of the document carried by this request.
    ///
    pub fn document_uri(&self) -> String {
        document_uri(&self.request_url, &self.id, self.content_location.as_deref())
    }
}

struct Running {
    pool: WorkerPool,
    context: Arc<JobContext>,
}

/// Accepts documents, buffers them, and transforms them on a bounded pool of workers.
///
/// A transformer is configured, then started with the callback that receives every outcome. Submitting a request
/// either fails right away, or guarantees exactly one call to that callback:
///
/// ```no_run
/// use std::sync::Arc;
///
/// use processing::{ChannelCallback, InboundRequest, Transformer};
/// use services::{CommandExtractor, ExtractionConfig};
///
/// let mut transformer = Transformer::new(Arc::new(CommandExtractor::from_config()), ExtractionConfig::default());
/// transformer.set_max_pool_size(4)?;
///
/// let (callback, mut completions) = ChannelCallback::new();
/// transformer.start(Arc::new(callback))?;
///
/// let request = InboundRequest::new("42", "text/html", "http://localhost/transform");
/// transformer.transform(&request, &b"<html></html>"[..])?;
///
/// let completion = completions.blocking_recv().unwrap();
/// # Ok::<(), processing::TransformError>(())
/// ```
///
pub struct Transformer {
    instance: u64,
    engine: Arc<dyn ExtractionEngine>,
    extraction: Arc<ExtractionConfig>,
    pool_config: PoolConfig,
    spill_dir: PathBuf,
    active: Arc<ActiveRequests>,
    running: Option<Running>,
}

impl Transformer {
    /// Creates a transformer with the default pool sizing and spill directory.
    ///
    pub fn new(engine: Arc<dyn ExtractionEngine>, extraction: ExtractionConfig) -> Self {
        Self::with_settings(engine, extraction, PoolConfig::default(), std::env::temp_dir().join(DEFAULT_SPILL_DIR))
    }

    /// Creates a transformer with the pool sizing and spill directory read from the environment.
    ///
    /// See [`PoolConfig::from_config`]. The spill directory is read from `SPILL_DIR`.
    ///
    pub fn from_config(engine: Arc<dyn ExtractionEngine>, extraction: ExtractionConfig) -> Self {
        let spill_dir = config().get("SPILL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_SPILL_DIR));
        Self::with_settings(engine, extraction, PoolConfig::from_config(), spill_dir)
    }

    fn with_settings(
        engine: Arc<dyn ExtractionEngine>,
        extraction: ExtractionConfig,
        pool_config: PoolConfig,
        spill_dir: PathBuf,
    ) -> Self {
        Self {
            instance: INSTANCES.fetch_add(1, Ordering::Relaxed),
            engine,
            extraction: Arc::new(extraction),
            pool_config,
            spill_dir,
            active: Arc::new(ActiveRequests::new()),
            running: None,
        }
    }

    /// Current pool sizing.
    ///
    pub fn pool_config(&self) -> PoolConfig {
        self.pool_config
    }

    /// Sets the number of workers kept alive while idle.
    ///
    /// Fails with [`TransformError::InvalidState`] once started.
    ///
    pub fn set_core_pool_size(&mut self, size: usize) -> Result<(), TransformError> {
        self.ensure_not_started("core pool size")?;
        self.pool_config.core_pool_size = size;
        Ok(())
    }

    /// Sets the maximum number of concurrent transformations.
    ///
    /// Fails with [`TransformError::InvalidState`] once started.
    ///
    pub fn set_max_pool_size(&mut self, size: usize) -> Result<(), TransformError> {
        self.ensure_not_started("max pool size")?;
        self.pool_config.max_pool_size = size;
        Ok(())
    }

    /// Sets how long workers above the core size stay idle before they exit.
    ///
    /// Fails with [`TransformError::InvalidState`] once started.
    ///
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> Result<(), TransformError> {
        self.ensure_not_started("keep alive time")?;
        self.pool_config.keep_alive = keep_alive;
        Ok(())
    }

    /// Directory below which the transformer keeps its buffered content and results.
    ///
    /// The directory can be shared with other transformers, in this or other processes. Each of them works in a
    /// spill area of its own below it.
    ///
    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Sets the directory below which the transformer keeps its buffered content and results.
    ///
    /// Fails with [`TransformError::InvalidState`] once started.
    ///
    pub fn set_spill_dir(&mut self, dir: impl Into<PathBuf>) -> Result<(), TransformError> {
        self.ensure_not_started("spill directory")?;
        self.spill_dir = dir.into();
        Ok(())
    }

    fn ensure_not_started(&self, setting: &str) -> Result<(), TransformError> {
        match self.running {
            Some(_) => Err(TransformError::InvalidState(format!("can't change the {} after start", setting))),
            None => Ok(()),
        }
    }

    /// Starts the worker pool, reporting every outcome to `callback`.
    ///
    /// Spill areas in the spill directory whose owner is gone, e.g. a process that didn't shut down cleanly, are
    /// removed together with their files. Areas of live transformers are left alone.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the transformer accepts requests now.
    /// * `Err(TransformError::InvalidState)` - If already started.
    /// * `Err(TransformError::InvalidConfiguration)` - If the pool sizing is inconsistent, or the spill area can't be
    ///     created.
    ///
    pub fn start(&mut self, callback: Arc<dyn CallbackHandler>) -> Result<(), TransformError> {
        if self.running.is_some() {
            return Err(TransformError::InvalidState("transformer is already started".to_string()));
        }

        let pool = WorkerPool::new(self.pool_config)?;
        match sweep_abandoned_areas(&self.spill_dir) {
            Ok(0) => {}
            Ok(removed) => info!(" - removed {} abandoned spill areas from {}", removed, self.spill_dir.display()),
            Err(err) => warn!("Unable to sweep {}: {}", self.spill_dir.display(), err),
        }
        let area = SpillArea::create_in(&self.spill_dir).map_err(|err| TransformError::InvalidConfiguration(
            format!("unable to create spill area in {}: {}", self.spill_dir.display(), err)
        ))?;

        info!(
            "> start transformer [core: {} | max: {} | keep alive: {:?} | spill: {}]",
            self.pool_config.core_pool_size,
            self.pool_config.max_pool_size,
            self.pool_config.keep_alive,
            area.path().display(),
        );
        self.running = Some(Running {
            pool,
            context: Arc::new(JobContext {
                instance: self.instance,
                engine: self.engine.clone(),
                extraction: self.extraction.clone(),
                active: self.active.clone(),
                callback,
                area: Arc::new(area),
            }),
        });
        Ok(())
    }

    /// Whether `start` was called.
    ///
    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// The spill area of this transformer, once started.
    ///
    pub fn work_dir(&self) -> Option<&Path> {
        self.running.as_ref().map(|running| running.context.area.path())
    }

    fn running(&self) -> Result<&Running, TransformError> {
        self.running.as_ref()
            .ok_or_else(|| TransformError::InvalidState("transformer is not started".to_string()))
    }

    fn check_request(&self, request: &InboundRequest) -> Result<&Running, TransformError> {
        let running = self.running()?;
        if running.pool.is_shutdown() {
            return Err(TransformError::InvalidState("transformer is closed".to_string()));
        }
        if !media::is_supported_input(&request.media_type) {
            return Err(TransformError::UnsupportedMediaType(request.media_type.clone()));
        }
        // Fails fast before buffering. `schedule` re-checks under the registry lock.
        if self.active.is_active(&request.id) {
            return Err(TransformError::DuplicateRequest(request.id.clone()));
        }
        Ok(running)
    }

    /// Buffers `body` and schedules its transformation.
    ///
    /// `body` is read to its end before this returns, regardless of the outcome of scheduling.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the transformation was scheduled. Its outcome is reported to the callback.
    /// * `Err(_)` - If the request was refused. The callback won't be called for it.
    ///
    pub fn transform(&self, request: &InboundRequest, body: impl Read) -> Result<(), TransformError> {
        let running = self.check_request(request)?;
        let buffer = ContentBuffer::create_in(
            running.context.area.path(),
            request.id.as_str(),
            body,
            request.media_type.as_str(),
            request.document_uri(),
        ).map_err(TransformError::Ingestion)?;
        self.schedule(buffer)
    }

    /// Buffers an asynchronous `body` and schedules its transformation.
    ///
    /// Behaves like [`Transformer::transform`].
    ///
    pub async fn transform_async<R>(&self, request: &InboundRequest, body: R) -> Result<(), TransformError>
        where R: AsyncRead + Unpin
    {
        let running = self.check_request(request)?;
        let buffer = ContentBuffer::create_async(
            running.context.area.path(),
            request.id.as_str(),
            body,
            request.media_type.as_str(),
            request.document_uri(),
        ).await.map_err(TransformError::Ingestion)?;
        self.schedule(buffer)
    }

    /// Schedules the transformation of already buffered content.
    ///
    /// The request is registered as active before a worker can pick it up. If scheduling fails, the request isn't
    /// registered and the buffer is released.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If a worker took the job.
    /// * `Err(TransformError::DuplicateRequest)` - If a request with the same id is active.
    /// * `Err(TransformError::Rejected)` - If all workers are busy.
    /// * `Err(TransformError::InvalidState)` - If the transformer isn't running.
    ///
    pub fn schedule(&self, buffer: ContentBuffer) -> Result<(), TransformError> {
        let running = self.running()?;
        if !media::is_supported_input(buffer.content_type()) {
            return Err(TransformError::UnsupportedMediaType(buffer.content_type().to_string()));
        }

        let job = TransformationJob::new(buffer, running.context.clone());
        let id = job.id().to_string();
        debug!(" - schedule {:?}", job);

        let scheduled = self.active.register_with(&id, || {
            running.pool.submit(Box::new(move || {
                job.run();
            }))
        });
        if let Err(err) = &scheduled {
            warn!("Unable to schedule {}: {}", id, err);
        }
        scheduled
    }

    /// Whether a request with `id` is scheduled or executing.
    ///
    pub fn is_active(&self, id: &str) -> bool {
        self.active.is_active(id)
    }

    /// State of the request with `id`, or `None` if it isn't active.
    ///
    pub fn job_state(&self, id: &str) -> Option<JobState> {
        self.active.state(id)
    }

    /// Number of active requests.
    ///
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of live workers.
    ///
    pub fn worker_count(&self) -> usize {
        self.running.as_ref().map_or(0, |running| running.pool.worker_count())
    }

    /// Number of workers waiting for a job.
    ///
    pub fn idle_workers(&self) -> usize {
        self.running.as_ref().map_or(0, |running| running.pool.idle_count())
    }

    /// Media types accepted by `transform`.
    ///
    pub fn supported_input_formats(&self) -> &'static [&'static str] {
        &media::INPUT_FORMATS
    }

    /// Media types results are produced in.
    ///
    pub fn supported_output_formats(&self) -> &'static [&'static str] {
        &media::OUTPUT_FORMATS
    }

    /// Stops accepting requests.
    ///
    /// Scheduled transformations still complete and report to the callback. The spill area is removed once they
    /// have, the transformer is dropped, and every [`ResultEntity`](crate::ResultEntity) it produced is gone.
    ///
    pub fn close(&self) {
        if let Some(running) = &self.running {
            running.pool.shutdown();
        }
    }

    /// Waits until all workers have exited after `close`.
    ///
    /// Returns `false` if transformations are still running after `timeout`.
    ///
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.running.as_ref().map_or(true, |running| running.pool.await_termination(timeout))
    }
}

impl Drop for Transformer {
    fn drop(&mut self) {
        self.close();
    }
}
