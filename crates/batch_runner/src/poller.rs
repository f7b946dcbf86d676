//! Background status polling exposed as a [`Stream`].
//!
//! Each [`PollSession`] owns one spawned producer task. The producer ticks
//! at a fixed interval, fetches the batch status once per tick and forwards
//! events through a bounded channel. It exits, dropping its sender, on a
//! terminal snapshot, a lookup-fatal error, the deadline, or cancellation.
//! Dropping the session cancels the producer.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use runs_api::{RetryPolicy, RunsApiClient, RunsApiError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::snapshot::BatchStatusSnapshot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(90 * 60);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Upper bound for waits and intervals; longer values are clamped here so
/// deadline arithmetic cannot overflow.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub channel_capacity: usize,
    /// Policy for each tick's fetch. Single-attempt by default; the tick
    /// interval already spaces out retries.
    pub tick_policy: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tick_policy: RetryPolicy::single_attempt(),
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_tick_policy(mut self, policy: RetryPolicy) -> Self {
        self.tick_policy = policy;
        self
    }
}

#[derive(Debug)]
pub enum PollEvent {
    Snapshot(BatchStatusSnapshot),
    /// The deadline passed before a terminal status; the batch may still be
    /// running server-side.
    TimedOut,
    /// The lookup failed in a way another tick will not fix.
    Failed(RunsApiError),
}

#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: RunsApiClient,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(client: RunsApiClient) -> Self {
        Self::with_config(client, PollerConfig::default())
    }

    pub fn with_config(client: RunsApiClient, config: PollerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Starts polling `batch_id` until a terminal status or `max_wait`.
    ///
    /// Cancelling `cancel` closes the session without a further event.
    /// Must be called inside a tokio runtime.
    pub fn start(
        &self,
        batch_id: impl Into<String>,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> PollSession {
        let batch_id = batch_id.into();
        let token = cancel.child_token();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let interval = self
            .config
            .interval
            .clamp(Duration::from_millis(1), FAR_FUTURE);

        let producer = Producer {
            client: self.client.clone(),
            batch_id: batch_id.clone(),
            interval,
            policy: self.config.tick_policy.clone(),
            deadline: Instant::now() + max_wait.min(FAR_FUTURE),
            token: token.clone(),
            sender,
        };
        let task = tokio::spawn(producer.run());

        PollSession {
            batch_id,
            interval,
            token,
            receiver,
            task,
            finished: false,
        }
    }
}

/// Live view of one polling run; yields [`PollEvent`]s in fetch order.
#[derive(Debug)]
pub struct PollSession {
    batch_id: String,
    interval: Duration,
    token: CancellationToken,
    receiver: mpsc::Receiver<PollEvent>,
    task: JoinHandle<()>,
    finished: bool,
}

impl PollSession {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the producer; the stream ends without a further event.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the producer task has exited.
    pub fn is_producer_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for PollSession {
    type Item = PollEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PollEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        // Buffered events are dropped once the caller has cancelled.
        if self.token.is_cancelled() {
            self.finished = true;
            self.receiver.close();
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Producer {
    client: RunsApiClient,
    batch_id: String,
    interval: Duration,
    policy: RetryPolicy,
    deadline: Instant,
    token: CancellationToken,
    sender: mpsc::Sender<PollEvent>,
}

impl Producer {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);
        let mut tick = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = &mut deadline => {
                    self.timed_out().await;
                    break;
                }
                _ = ticker.tick() => {}
            }
            tick += 1;

            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = &mut deadline => {
                    self.timed_out().await;
                    break;
                }
                fetched = self.client.batch_status(&self.batch_id, &self.policy, &self.token) => fetched,
            };

            match fetched {
                Ok(response) => {
                    let snapshot = BatchStatusSnapshot::from(response);
                    let terminal = snapshot.is_terminal();
                    debug!(
                        batch_id = %self.batch_id,
                        tick,
                        status = snapshot.overall_status.as_str(),
                        "batch status"
                    );
                    if !self.emit(PollEvent::Snapshot(snapshot)).await || terminal {
                        break;
                    }
                }
                Err(RunsApiError::Cancelled) => break,
                Err(error) if error.is_transient() => {
                    warn!(batch_id = %self.batch_id, tick, %error, "status poll failed; retrying next tick");
                }
                Err(error) => {
                    warn!(batch_id = %self.batch_id, tick, %error, "status poll failed permanently");
                    self.emit(PollEvent::Failed(error)).await;
                    break;
                }
            }
        }
        debug!(batch_id = %self.batch_id, ticks = tick, "status poller stopped");
    }

    async fn timed_out(&self) {
        info!(batch_id = %self.batch_id, "status polling deadline reached");
        self.emit(PollEvent::TimedOut).await;
    }

    /// Returns false when the consumer is gone or the session was cancelled.
    async fn emit(&self, event: PollEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.sender.send(event) => sent.is_ok(),
        }
    }
}
