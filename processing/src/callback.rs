use log::warn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{ResultEntity, TransformError};

/// Receives the outcome of every scheduled transformation.
///
/// Exactly one of the two methods is called per scheduled request, on the worker thread that ran the job, after all
/// resources of the job were released and the request was removed from the active set. Implementations must be safe to
/// call from several workers at once.
///
#[cfg_attr(test, mockall::automock)]
pub trait CallbackHandler: Send + Sync {
    /// Called with the result of a successful transformation.
    ///
    fn response_available(&self, id: &str, entity: ResultEntity);

    /// Called with the error a transformation failed with.
    ///
    fn report_failure(&self, id: &str, error: TransformError);
}

/// The outcome of a single transformation.
///
#[derive(Debug)]
pub struct Completion {
    /// Identifier of the request.
    ///
    pub id: String,

    /// The result, or the error the transformation failed with.
    ///
    pub outcome: Result<ResultEntity, TransformError>,
}

/// Callback forwarding every outcome into a channel.
///
/// Useful for asynchronous consumers that await completions instead of reacting to them on worker threads.
///
pub struct ChannelCallback {
    sink: UnboundedSender<Completion>,
}

impl ChannelCallback {
    /// Creates a callback and the receiver its completions are sent to.
    ///
    pub fn new() -> (Self, UnboundedReceiver<Completion>) {
        let (sink, completions) = unbounded_channel();
        (Self { sink }, completions)
    }

    fn send(&self, id: &str, outcome: Result<ResultEntity, TransformError>) {
        if self.sink.send(Completion { id: id.to_string(), outcome }).is_err() {
            warn!("Dropping outcome of request {}, nobody is listening", id);
        }
    }
}

impl CallbackHandler for ChannelCallback {
    fn response_available(&self, id: &str, entity: ResultEntity) {
        self.send(id, Ok(entity));
    }

    fn report_failure(&self, id: &str, error: TransformError) {
        self.send(id, Err(error));
    }
}
