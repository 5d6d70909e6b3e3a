//! Background delivery of event envelopes.
//!
//! Request handlers hand envelopes to an [`EventEmitter`], which only enqueues them on a
//! bounded channel. A single worker task owns the transport ([`EventSink`]), publishes in
//! queue order, retries failures with exponential backoff and records envelopes it had to
//! give up on as dead letters.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::events::EventEnvelope;

/// Transport-level publish failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("event transport unavailable: {0}")]
    Unavailable(String),
    #[error("event transport refused envelope: {0}")]
    Refused(String),
}

/// Transport seam for outbound envelopes (message broker, webhook, log).
pub trait EventSink: Send + Sync + 'static {
    fn publish(
        &self,
        envelope: &EventEnvelope,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Keeps every published envelope in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventSink {
    published: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl RecordingEventSink {
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingEventSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        self.published
            .lock()
            .map_err(|_| TransportError::Unavailable("recording sink lock poisoned".to_string()))?
            .push(envelope.clone());
        Ok(())
    }
}

/// Writes each serialized envelope to the log. Used when no broker is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let body = envelope
            .to_body()
            .map_err(|err| TransportError::Refused(err.to_string()))?;
        info!(
            routing_key = envelope.routing_key(),
            body = %String::from_utf8_lossy(&body),
            "event published to log transport"
        );
        Ok(())
    }
}

/// Exponential backoff for failed publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt before an envelope is dead-lettered.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Dead letters retained for inspection before the oldest are evicted.
    pub dead_letter_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            retry: RetryPolicy::default(),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    QueueFull,
    QueueClosed,
    RetriesExhausted { attempts: usize, last_error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub reason: DeadLetterReason,
}

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct DeadLetterLog {
    entries: VecDeque<DeadLetter>,
    evicted: u64,
}

/// Shared record of envelopes that could not be delivered. Keeps the most recent
/// `capacity` entries; older ones are evicted and counted.
#[derive(Debug, Clone)]
pub struct DeadLetters {
    log: Arc<Mutex<DeadLetterLog>>,
    capacity: usize,
}

impl Default for DeadLetters {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

impl DeadLetters {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn record(&self, envelope: EventEnvelope, reason: DeadLetterReason) {
        error!(
            event_id = envelope.event_id(),
            event_name = envelope.event_name(),
            routing_key = envelope.routing_key(),
            ?reason,
            "event dead-lettered"
        );
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.push_back(DeadLetter { envelope, reason });
        while log.entries.len() > self.capacity {
            log.entries.pop_front();
            log.evicted += 1;
        }
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.iter().cloned().collect()
    }

    /// Removes and returns the retained entries, e.g. for a replay job.
    pub fn drain(&self) -> Vec<DeadLetter> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.drain(..).collect()
    }

    /// Entries dropped because the log was full.
    pub fn evicted(&self) -> u64 {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evicted
    }
}

/// Cheap, clonable handle used on the request path. Never waits for delivery.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<EventEnvelope>,
    dead_letters: DeadLetters,
}

impl EventEmitter {
    /// Enqueue an envelope. Returns `false` if it was dead-lettered instead.
    pub fn emit(&self, envelope: EventEnvelope) -> bool {
        match self.sender.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                self.dead_letters.record(envelope, DeadLetterReason::QueueFull);
                false
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                self.dead_letters.record(envelope, DeadLetterReason::QueueClosed);
                false
            }
        }
    }

    pub fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }
}

/// Owns the worker task. Dropping it closes the queue without waiting for the drain.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<()>,
    dead_letters: DeadLetters,
}

impl DispatcherHandle {
    pub fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }

    /// Stop accepting envelopes, deliver what is already queued, then release the sink.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.worker.await {
            error!(error = %err, "event dispatcher worker failed");
        }
    }
}

pub struct EventDispatcher<S> {
    sink: Arc<S>,
    retry: RetryPolicy,
    receiver: mpsc::Receiver<EventEnvelope>,
    shutdown: oneshot::Receiver<()>,
    dead_letters: DeadLetters,
}

impl<S: EventSink> EventDispatcher<S> {
    /// Start the delivery worker on the current tokio runtime.
    pub fn spawn(sink: Arc<S>, config: DispatchConfig) -> (EventEmitter, DispatcherHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dead_letters = DeadLetters::with_capacity(config.dead_letter_capacity);

        let dispatcher = Self {
            sink,
            retry: config.retry,
            receiver,
            shutdown: shutdown_rx,
            dead_letters: dead_letters.clone(),
        };
        let worker = tokio::spawn(dispatcher.run());

        (
            EventEmitter {
                sender,
                dead_letters: dead_letters.clone(),
            },
            DispatcherHandle {
                shutdown: shutdown_tx,
                worker,
                dead_letters,
            },
        )
    }

    async fn run(mut self) {
        let mut closing = false;
        loop {
            tokio::select! {
                next = self.receiver.recv() => match next {
                    Some(envelope) => self.deliver(envelope).await,
                    None => break,
                },
                _ = &mut self.shutdown, if !closing => {
                    closing = true;
                    self.receiver.close();
                }
            }
        }
        info!("event dispatcher stopped");
    }

    async fn deliver(&self, envelope: EventEnvelope) {
        let mut attempt = 0;
        loop {
            match self.sink.publish(&envelope).await {
                Ok(()) => {
                    info!(
                        event_id = envelope.event_id(),
                        event_name = envelope.event_name(),
                        routing_key = envelope.routing_key(),
                        retries = attempt,
                        "event published"
                    );
                    return;
                }
                Err(err) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        event_id = envelope.event_id(),
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "event publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.dead_letters.record(
                        envelope,
                        DeadLetterReason::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: err.to_string(),
                        },
                    );
                    return;
                }
            }
        }
    }
}
