//! Push channel connection with cancellable exponential-backoff reconnects.
//!
//! All reconnect state lives in one [`PushConnection`], so independent
//! connections never share counters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sealchat_core::config::PushConfig;
use sealchat_core::TransportError;

use crate::events::PushEvent;
use crate::transport::AccessToken;

/// `delay(n) = min(cap, base * 2^n)` for the n-th consecutive failure (from 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &PushConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_cap_ms),
        )
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

/// Something that can open a push channel. Each open yields raw text frames
/// until the connection drops, at which point the receiver closes.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn open(&self, token: &AccessToken) -> Result<mpsc::Receiver<String>, TransportError>;
}

/// A reconnect that has been scheduled but not yet started.
#[derive(Debug)]
pub struct ScheduledRetry {
    pub delay: Duration,
    cancel: CancellationToken,
}

impl ScheduledRetry {
    /// `true` once the delay elapsed, `false` if the retry was cancelled first.
    pub async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

pub struct PushConnection {
    source: Arc<dyn PushSource>,
    policy: ReconnectPolicy,
    attempts: u32,
    pending_retry: Option<CancellationToken>,
}

impl PushConnection {
    pub fn new(source: Arc<dyn PushSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            attempts: 0,
            pending_retry: None,
        }
    }

    /// Consecutive failures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Open the channel now. Any retry still waiting is cancelled first.
    pub async fn connect(
        &mut self,
        token: &AccessToken,
    ) -> Result<mpsc::Receiver<String>, TransportError> {
        if let Some(pending) = self.pending_retry.take() {
            pending.cancel();
        }
        let frames = self.source.open(token).await?;
        self.attempts = 0;
        Ok(frames)
    }

    /// Schedule the next reconnect using the current failure count.
    pub fn schedule_retry(&mut self) -> ScheduledRetry {
        let delay = self.policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        let cancel = CancellationToken::new();
        if let Some(previous) = self.pending_retry.replace(cancel.clone()) {
            previous.cancel();
        }
        ScheduledRetry { delay, cancel }
    }

    /// Drive the connection until `shutdown` fires, the event receiver goes
    /// away, or the directory rejects the token.
    ///
    /// Malformed frames are logged and dropped.
    pub async fn run(
        mut self,
        token: AccessToken,
        events: mpsc::Sender<PushEvent>,
        shutdown: CancellationToken,
        connect_now: Arc<Notify>,
    ) -> Result<(), TransportError> {
        loop {
            let opened = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                opened = self.connect(&token) => opened,
            };

            match opened {
                Ok(mut frames) => {
                    info!("push channel connected");
                    loop {
                        let frame = tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            frame = frames.recv() => frame,
                        };
                        let Some(frame) = frame else { break };
                        match PushEvent::parse(&frame) {
                            Ok(event) => {
                                if events.send(event).await.is_err() {
                                    debug!("push event receiver dropped, stopping");
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping push frame"),
                        }
                    }
                    warn!("push channel disconnected");
                }
                Err(TransportError::Unauthorized) => {
                    warn!("push channel rejected the session token");
                    return Err(TransportError::Unauthorized);
                }
                Err(e) => warn!(error = %e, "push channel connect failed"),
            }

            let retry = self.schedule_retry();
            debug!(
                delay_ms = retry.delay.as_millis() as u64,
                attempt = self.attempts,
                "scheduling push reconnect"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = connect_now.notified() => debug!("reconnect requested, skipping backoff"),
                _ = retry.wait() => {}
            }
        }
    }
}

/// Handle to a push connection running on its own task.
pub struct PushHandle {
    shutdown: CancellationToken,
    connect_now: Arc<Notify>,
    task: tokio::task::JoinHandle<Result<(), TransportError>>,
}

impl PushHandle {
    pub fn spawn(
        connection: PushConnection,
        token: AccessToken,
        events: mpsc::Sender<PushEvent>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let connect_now = Arc::new(Notify::new());
        let task = tokio::spawn(connection.run(
            token,
            events,
            shutdown.clone(),
            Arc::clone(&connect_now),
        ));
        Self {
            shutdown,
            connect_now,
            task,
        }
    }

    /// Skip any pending backoff and reconnect immediately.
    pub fn reconnect_now(&self) {
        self.connect_now.notify_one();
    }

    pub async fn shutdown(self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| TransportError::Network(format!("push task failed: {e}")))?
    }
}
