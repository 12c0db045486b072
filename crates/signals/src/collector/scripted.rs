//! In-process connector driven by a script, for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use orderflow_core::{ConnectError, SymbolEvent};
use parking_lot::Mutex;

use crate::collector::feed::{FeedConnector, FeedMessage, FeedStream};

/// Outcome of one `connect` call.
pub enum ScriptStep<E> {
    /// Connection refused
    Fail,
    /// Connect, deliver the messages, then end the stream
    Messages(Vec<FeedMessage<E>>),
    /// Connect, deliver the messages, then stay open silently
    Hold(Vec<FeedMessage<E>>),
}

/// Plays one step per `connect` call; fails once the script is exhausted.
pub struct ScriptedConnector<E> {
    steps: Mutex<VecDeque<ScriptStep<E>>>,
    calls: Arc<AtomicU32>,
}

impl<E> ScriptedConnector<E> {
    pub fn new(steps: Vec<ScriptStep<E>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared count of `connect` calls.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl<E: SymbolEvent> FeedConnector for ScriptedConnector<E> {
    type Event = E;

    async fn connect(&self, _symbols: &[String]) -> Result<FeedStream<E>, ConnectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();

        match step {
            None | Some(ScriptStep::Fail) => {
                Err(ConnectError::Unreachable("scripted failure".to_string()))
            }
            Some(ScriptStep::Messages(messages)) => {
                Ok(Box::pin(stream::iter(messages.into_iter().map(Ok::<_, ConnectError>))))
            }
            Some(ScriptStep::Hold(messages)) => Ok(Box::pin(
                stream::iter(messages.into_iter().map(Ok::<_, ConnectError>)).chain(stream::pending()),
            )),
        }
    }
}
