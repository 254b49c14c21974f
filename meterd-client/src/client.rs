//! HTTP client for the metering service
//!
//! Emits events over the transport selected at construction. Whatever the
//! mode, a metering failure is contained: the synchronous transport is the
//! only one that ever returns an error to the caller, and even it buffers
//! the event locally first.

use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, warn};

use meterd_core::NewEvent;

use crate::config::{ClientConfig, TransportMode};
use crate::errors::{ClientError, ClientResult};
use crate::queue::EventQueue;

/// Backoff cap for the synchronous transport.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Initial backoff for the synchronous transport.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Next backoff delay: doubled, capped at [`MAX_RETRY_DELAY`].
fn next_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RETRY_DELAY)
}

#[derive(Debug, Deserialize)]
struct IngestAck {
    #[allow(dead_code)]
    status: String,
    events_processed: usize,
}

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    queue: EventQueue,
}

/// Metering emitter embedded in application processes.
///
/// Cheap to clone; all clones share the HTTP connection pool, the local
/// buffer and (in batch mode) the background worker.
#[derive(Clone)]
pub struct MeterClient {
    inner: Arc<ClientInner>,
    worker: Arc<parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>>,
    shutdown: watch::Sender<bool>,
}

impl MeterClient {
    /// Build a client. In batch mode this spawns the draining worker and
    /// therefore must be called within a Tokio runtime.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let inner = Arc::new(ClientInner {
            http,
            queue: EventQueue::new(config.queue_capacity),
            config,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Arc::new(parking_lot::Mutex::new(None));

        let client = Self {
            inner,
            worker,
            shutdown,
        };

        if client.inner.config.transport_mode == TransportMode::Batch {
            let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                ClientError::Config {
                    message: "batch transport requires a Tokio runtime".to_string(),
                }
            })?;
            let task = handle.spawn(Self::worker_loop(Arc::clone(&client.inner), shutdown_rx));
            *client.worker.lock() = Some(task);
        }

        Ok(client)
    }

    /// Build a client from `METERING_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Number of events waiting in the local buffer.
    pub fn buffered(&self) -> usize {
        self.inner.queue.len()
    }

    /// Emit one event over the configured transport.
    ///
    /// Only the synchronous transport can return an error; the async and
    /// batch transports absorb failures into the local buffer.
    pub async fn record(&self, event: NewEvent) -> ClientResult<()> {
        Self::dispatch(Arc::clone(&self.inner), event).await
    }

    /// Emit one event without awaiting: spawns onto the current runtime,
    /// or buffers locally when called outside one. Never fails.
    pub fn record_detached(&self, mut event: NewEvent) {
        event.timestamp.get_or_insert_with(Utc::now);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    if let Err(e) = Self::dispatch(inner, event).await {
                        debug!("detached metering emission failed: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.inner.queue.push(event) {
                    warn!("⚠️ metering event dropped: {}", e);
                }
            }
        }
    }

    async fn dispatch(inner: Arc<ClientInner>, mut event: NewEvent) -> ClientResult<()> {
        event.timestamp.get_or_insert_with(Utc::now);

        match inner.config.transport_mode {
            TransportMode::Sync => Self::send_with_retry(&inner, event).await,
            TransportMode::Async => {
                tokio::spawn(async move {
                    if let Err(e) = Self::post_event(&inner, &event).await {
                        debug!("async metering emission failed, buffering: {}", e);
                        if let Err(e) = inner.queue.push(event) {
                            warn!("⚠️ metering event dropped: {}", e);
                        }
                    }
                });
                Ok(())
            }
            TransportMode::Batch => {
                if let Err(e) = inner.queue.push(event) {
                    warn!("⚠️ metering event dropped: {}", e);
                }
                Ok(())
            }
        }
    }

    /// Synchronous transport: up to `retry_max_attempts` POSTs with
    /// exponential backoff. On exhaustion the event goes to the local
    /// buffer and the failure surfaces to the caller.
    async fn send_with_retry(inner: &Arc<ClientInner>, event: NewEvent) -> ClientResult<()> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_error = String::new();

        for attempt in 1..=inner.config.retry_max_attempts.max(1) {
            match Self::post_event(inner, &event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < inner.config.retry_max_attempts {
                        debug!(
                            "metering POST attempt {}/{} failed: {}",
                            attempt, inner.config.retry_max_attempts, last_error
                        );
                        tokio::time::sleep(delay).await;
                        delay = next_delay(delay);
                    }
                }
            }
        }

        if let Err(e) = inner.queue.push(event) {
            warn!("⚠️ metering event dropped after retries: {}", e);
        }
        Err(ClientError::Api {
            message: format!(
                "failed to record event after {} attempts: {}",
                inner.config.retry_max_attempts, last_error
            ),
        })
    }

    async fn post_event(inner: &Arc<ClientInner>, event: &NewEvent) -> ClientResult<()> {
        let url = format!("{}/v1/meter/events", inner.config.api_url.trim_end_matches('/'));
        let response = inner
            .http
            .post(&url)
            .headers(Self::headers(inner))
            .json(event)
            .send()
            .await
            .map_err(api_error)?;

        response.error_for_status().map_err(api_error)?;
        Ok(())
    }

    async fn post_batch(inner: &Arc<ClientInner>, events: &[NewEvent]) -> ClientResult<()> {
        let url = format!(
            "{}/v1/meter/events/batch",
            inner.config.api_url.trim_end_matches('/')
        );
        let response = inner
            .http
            .post(&url)
            .headers(Self::headers(inner))
            // Batch POSTs carry more payload; double the budget.
            .timeout(inner.config.timeout * 2)
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
            .map_err(api_error)?;

        let ack: IngestAck = response
            .error_for_status()
            .map_err(api_error)?
            .json()
            .await
            .map_err(api_error)?;

        debug!("batch POST acknowledged {} events", ack.events_processed);
        Ok(())
    }

    fn headers(inner: &Arc<ClientInner>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !inner.config.api_key.is_empty() {
            if let Ok(value) = inner.config.api_key.parse() {
                headers.insert("X-API-Key", value);
            }
        }
        headers
    }

    /// Background worker: one batch per tick; a failed batch goes back to
    /// the front of the buffer for the next tick.
    async fn worker_loop(inner: Arc<ClientInner>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(inner.config.batch_interval.max(Duration::from_millis(10)));
        tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    Self::drain_one_batch(&inner).await;
                }
                changed = shutdown.changed() => {
                    let stopping = changed.is_err() || *shutdown.borrow();
                    if stopping {
                        // Final flush: push out whatever is buffered.
                        while !inner.queue.is_empty() {
                            if !Self::drain_one_batch(&inner).await {
                                break;
                            }
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Drain and send a single batch. Returns whether the send succeeded.
    async fn drain_one_batch(inner: &Arc<ClientInner>) -> bool {
        let batch = inner.queue.drain_batch(inner.config.batch_size);
        if batch.is_empty() {
            return true;
        }

        match Self::post_batch(inner, &batch).await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ batch send failed, re-queueing {} events: {}", batch.len(), e);
                inner.queue.requeue_front(batch);
                false
            }
        }
    }

    /// Stop the batch worker, flushing the buffer, within a 5 second join.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.worker.lock().take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("⚠️ batch worker did not stop within 5s, aborting");
                abort.abort();
            }
        }
    }
}

fn api_error(e: reqwest::Error) -> ClientError {
    ClientError::Api {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_ten_seconds() {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut schedule = vec![delay];
        for _ in 0..4 {
            delay = next_delay(delay);
            schedule.push(delay);
        }
        assert_eq!(
            schedule,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }
}
