//! Feed connection supervisor.
//!
//! Owns one streaming connection, forwards events for subscribed symbols
//! into a bounded channel and reconnects with capped exponential backoff.
//! The hot path never waits on the consumer: a full channel drops the
//! event and bumps a counter.
//!
//! After `max_restarts` consecutive failures the supervisor parks in
//! [`FeedState::Down`] and `run` returns. It will not connect again until
//! [`FeedHandle::reset`] is called and `run` is invoked anew.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use orderflow_core::{
    ConnectError, FeedState, MalformedEventError, RestartDecision, RestartState, SharedClock,
    Shutdown, ShutdownToken, SymbolEvent,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collector::types::{FeedCounters, FeedStats, SupervisorConfig};
use crate::common::should_log_occurrence;

/// One item read from an upstream connection.
#[derive(Debug)]
pub enum FeedMessage<E> {
    /// A decoded event
    Event(E),
    /// A payload that could not be decoded; counted and skipped
    Malformed(MalformedEventError),
    /// Upstream closed the connection
    Closed(String),
}

/// Stream of messages from one open connection. An `Err` item is a
/// protocol failure and ends the connection.
pub type FeedStream<E> =
    Pin<Box<dyn Stream<Item = Result<FeedMessage<E>, ConnectError>> + Send>>;

/// Opens upstream connections for a symbol set.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    type Event: SymbolEvent;

    async fn connect(&self, symbols: &[String]) -> Result<FeedStream<Self::Event>, ConnectError>;
}

/// Observer and control side of a supervisor, shared with its module.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    state: Arc<watch::Sender<FeedState>>,
    restart: Arc<Mutex<RestartState>>,
    counters: Arc<FeedCounters>,
    stop: Shutdown,
}

impl FeedHandle {
    fn new(max_restarts: u32) -> Self {
        let (state, _rx) = watch::channel(FeedState::Idle);
        Self {
            state: Arc::new(state),
            restart: Arc::new(Mutex::new(RestartState::new(max_restarts))),
            counters: Arc::new(FeedCounters::default()),
            stop: Shutdown::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Copy of the restart budget.
    #[must_use]
    pub fn restart_state(&self) -> RestartState {
        self.restart.lock().clone()
    }

    #[must_use]
    pub fn stats(&self) -> FeedStats {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn counters(&self) -> &FeedCounters {
        &self.counters
    }

    /// Forgives earlier restarts after a healthy cycle.
    ///
    /// Only applies while connected; returns whether the feed was connected.
    pub fn record_healthy_cycle(&self) -> bool {
        if self.state() != FeedState::Connected {
            return false;
        }
        let mut restart = self.restart.lock();
        if restart.restart_count > 0 {
            debug!(
                forgiven = restart.restart_count,
                "Healthy cycle, resetting restart count"
            );
            restart.reset();
        }
        true
    }

    /// Clears a terminal Down so the supervisor may run again.
    ///
    /// Returns false if the feed was not Down.
    pub fn reset(&self) -> bool {
        if !self.state().is_down() {
            return false;
        }
        self.restart.lock().reset();
        self.state.send_replace(FeedState::Idle);
        info!("Feed reset after going down");
        true
    }

    /// Requests the supervisor to stop. Idempotent.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Whether a stop was requested through this handle.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    fn set_state(&self, state: FeedState) {
        self.state.send_replace(state);
    }

    fn stop_token(&self) -> ShutdownToken {
        self.stop.token()
    }
}

enum PumpExit {
    Stopped,
    Lost(ConnectError),
}

/// Supervises one upstream connection.
pub struct FeedSupervisor<C: FeedConnector> {
    connector: C,
    config: SupervisorConfig,
    symbols: HashSet<String>,
    tx: mpsc::Sender<C::Event>,
    handle: FeedHandle,
    clock: SharedClock,
}

impl<C: FeedConnector> FeedSupervisor<C> {
    /// Creates a supervisor and the receiving end of its dispatch channel.
    pub fn new(
        connector: C,
        config: SupervisorConfig,
        clock: SharedClock,
    ) -> (Self, mpsc::Receiver<C::Event>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let symbols = config.symbols.iter().map(|s| s.to_uppercase()).collect();
        let handle = FeedHandle::new(config.max_restarts);

        let supervisor = Self {
            connector,
            config,
            symbols,
            tx,
            handle,
            clock,
        };
        (supervisor, rx)
    }

    #[must_use]
    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Opens a connection for the configured symbols.
    ///
    /// # Errors
    /// Returns the connector's `ConnectError`.
    pub async fn connect(&self) -> Result<FeedStream<C::Event>, ConnectError> {
        self.handle.set_state(FeedState::Connecting);
        let attempt = self.handle.counters.record_connect();
        debug!(feed = %self.config.name, attempt, "Connecting");

        let stream = self.connector.connect(&self.config.symbols).await?;

        self.handle.set_state(FeedState::Connected);
        info!(
            feed = %self.config.name,
            symbols = self.config.symbols.len(),
            "Feed connected"
        );
        Ok(stream)
    }

    /// Runs until stopped or until the restart budget is exhausted.
    ///
    /// Returns the terminal state, `Stopped` or `Down`.
    pub async fn run(&mut self) -> FeedState {
        let mut stop = self.handle.stop_token();

        if self.handle.state().is_down() {
            return FeedState::Down;
        }

        loop {
            if stop.is_cancelled() {
                return self.finish_stopped();
            }

            let connected = tokio::select! {
                _ = stop.cancelled() => return self.finish_stopped(),
                result = self.connect() => result,
            };

            let failure = match connected {
                Ok(stream) => match self.pump(stream, &mut stop).await {
                    PumpExit::Stopped => return self.finish_stopped(),
                    PumpExit::Lost(e) => e,
                },
                Err(e) => e,
            };

            let decision = self
                .handle
                .restart
                .lock()
                .record_failure(self.clock.now(), self.config.backoff_cap);

            match decision {
                RestartDecision::Exhausted => {
                    error!(
                        feed = %self.config.name,
                        max_restarts = self.config.max_restarts,
                        error = %failure,
                        "Restart budget exhausted, feed is down"
                    );
                    self.handle.set_state(FeedState::Down);
                    return FeedState::Down;
                }
                RestartDecision::Retry { attempt, delay } => {
                    let next_retry_at = self.clock.now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    warn!(
                        feed = %self.config.name,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "Feed connection lost, reconnecting"
                    );
                    self.handle.set_state(FeedState::Reconnecting {
                        attempt,
                        next_retry_at,
                    });

                    tokio::select! {
                        _ = stop.cancelled() => return self.finish_stopped(),
                        () = self.clock.sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn pump(&self, mut stream: FeedStream<C::Event>, stop: &mut ShutdownToken) -> PumpExit {
        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => return PumpExit::Stopped,
                next = tokio::time::timeout(self.config.read_timeout, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    return PumpExit::Lost(ConnectError::ReadTimeout(
                        self.config.read_timeout.as_secs(),
                    ))
                }
                Ok(None) => return PumpExit::Lost(ConnectError::Closed("stream ended".to_string())),
                Ok(Some(Err(e))) => return PumpExit::Lost(e),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                FeedMessage::Event(event) => {
                    if let Some(exit) = self.dispatch(event) {
                        return exit;
                    }
                }
                FeedMessage::Malformed(err) => self.reject(&err),
                FeedMessage::Closed(reason) => return PumpExit::Lost(ConnectError::Closed(reason)),
            }
        }
    }

    fn dispatch(&self, event: C::Event) -> Option<PumpExit> {
        if !self.symbols.contains(event.symbol()) {
            self.reject(&MalformedEventError::UnknownSymbol(event.symbol().to_string()));
            return None;
        }

        self.handle.counters.record_received();
        match self.tx.try_send(event) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => {
                let dropped = self.handle.counters.record_dropped();
                if should_log_occurrence(dropped) {
                    warn!(
                        feed = %self.config.name,
                        dropped,
                        capacity = self.config.channel_capacity,
                        "Dispatch channel full, dropping events"
                    );
                }
                None
            }
            Err(TrySendError::Closed(_)) => {
                info!(feed = %self.config.name, "Dispatch channel closed, stopping feed");
                Some(PumpExit::Stopped)
            }
        }
    }

    fn reject(&self, err: &MalformedEventError) {
        let malformed = self.handle.counters.record_malformed();
        if should_log_occurrence(malformed) {
            warn!(feed = %self.config.name, malformed, error = %err, "Rejected feed event");
        }
    }

    fn finish_stopped(&self) -> FeedState {
        self.handle.set_state(FeedState::Stopped);
        info!(feed = %self.config.name, "Feed stopped");
        FeedState::Stopped
    }
}
