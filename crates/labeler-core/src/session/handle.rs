//! Queue in front of a running session.

use super::{selection_detail, HostMessage, Session, ViewMessage};
use crate::cache::PredictionCache;
use crate::document::DocumentHost;
use crate::error::{LabelerError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Messages that may wait in the queue before the sender is back-pressured.
const QUEUE_DEPTH: usize = 64;

struct Request {
    message: ViewMessage,
    reply: oneshot::Sender<Vec<HostMessage>>,
}

/// Cloneable handle to a session running on its own task.
///
/// Messages are handled strictly in arrival order, one at a time. A handler
/// error is turned into a [`HostMessage::Error`] notice and the loop carries
/// on. The task ends after a `close` message.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Request>,
    host: Arc<dyn DocumentHost>,
    cache: PredictionCache,
    task: Arc<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start the session loop. Must be called inside a Tokio runtime.
    pub fn spawn(session: Session) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let host = session.host().clone();
        let cache = session.cache().clone();
        let task = tokio::spawn(run(session, receiver));

        Self {
            sender,
            host,
            cache,
            task: Arc::new(task),
        }
    }

    /// Queue a message and wait for its outbound messages.
    pub async fn send(&self, message: ViewMessage) -> Result<Vec<HostMessage>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request { message, reply })
            .await
            .map_err(|_| LabelerError::SessionClosed)?;
        response.await.map_err(|_| LabelerError::SessionClosed)
    }

    /// Cached detail for the current selection, answered outside the queue.
    pub async fn selection_detail(&self) -> Result<HostMessage> {
        selection_detail(self.host.as_ref(), &self.cache).await
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn run(mut session: Session, mut receiver: mpsc::Receiver<Request>) {
    while let Some(Request { message, reply }) = receiver.recv().await {
        let kind = message.kind();
        let out = match session.handle(message).await {
            Ok(out) => out,
            Err(e) => {
                warn!("{} failed: {}", kind, e);
                vec![HostMessage::error(&e)]
            }
        };

        if reply.send(out).is_err() {
            debug!("Caller of {} went away before the reply", kind);
        }
        if session.is_closed() {
            break;
        }
    }
    debug!("Session loop for '{}' stopped", session.cache().filename());
}
