use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::{Channel, DeliveryRecord, DispatchSummary, GeneratedMessage, MessageStatus};
use crate::retry::{retry_transient, RetryPolicy};
use crate::storage::DeliveryLog;
use crate::task_manager::CancelFlag;
use crate::transports::Transports;

/// Inter-message delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// A long pause replaces the random delay after every `long_pause_every` sends.
    pub long_pause_every: usize,
    pub long_pause: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15),
            long_pause_every: 50,
            long_pause: Duration::from_secs(300),
        }
    }
}

impl Pacing {
    pub fn random_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::rng().random_range(self.min_delay..=self.max_delay)
    }

    pub fn is_long_pause_due(&self, sent: usize) -> bool {
        self.long_pause_every > 0 && sent > 0 && sent % self.long_pause_every == 0
    }

    /// Delay owed after the `sent`-th send (1-based) when more sends remain.
    pub fn delay_after(&self, sent: usize) -> Duration {
        if self.is_long_pause_due(sent) {
            self.long_pause
        } else {
            self.random_delay()
        }
    }
}

/// Sleep seam so pacing can be observed without wall-clock waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

fn missing_credentials(channel: Channel) -> AppError {
    match channel {
        Channel::Email => AppError::Configuration("SMTP credentials not configured".to_string()),
        Channel::WhatsApp => {
            AppError::Configuration("WhatsApp credentials not configured".to_string())
        }
    }
}

/// Sequential, paced sender. One message at a time; never parallel.
#[derive(Clone)]
pub struct BulkDispatcher {
    transports: Transports,
    pacing: Pacing,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    log: Arc<dyn DeliveryLog>,
}

impl BulkDispatcher {
    pub fn new(transports: Transports, pacing: Pacing, log: Arc<dyn DeliveryLog>) -> Self {
        Self {
            transports,
            pacing,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            log,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fails when a pending message targets a channel with no configured transport.
    pub fn ensure_channels_configured(&self, messages: &[GeneratedMessage]) -> Result<(), AppError> {
        for message in messages.iter().filter(|m| m.status == MessageStatus::Pending) {
            let configured = match message.channel {
                Channel::Email => self.transports.email.is_some(),
                Channel::WhatsApp => self.transports.whatsapp.is_some(),
            };
            if !configured {
                return Err(missing_credentials(message.channel));
            }
        }
        Ok(())
    }

    async fn deliver(&self, message: &GeneratedMessage) -> Result<(), AppError> {
        match message.channel {
            Channel::Email => {
                let transport = self
                    .transports
                    .email
                    .as_ref()
                    .ok_or_else(|| missing_credentials(Channel::Email))?;
                let subject = message.subject.as_deref().unwrap_or_default();
                transport
                    .send_email(&message.recipient, subject, &message.body)
                    .await
            }
            Channel::WhatsApp => {
                let transport = self
                    .transports
                    .whatsapp
                    .as_ref()
                    .ok_or_else(|| missing_credentials(Channel::WhatsApp))?;
                transport
                    .send_whatsapp(&message.recipient, &message.body)
                    .await
            }
        }
    }

    /// Sends every pending message in input order.
    ///
    /// Messages that are not pending (already sent, or failed and never reset) are
    /// skipped. Each outcome is written to the delivery log before the next message
    /// is touched; a log write failure aborts the batch. Cancellation is checked
    /// between messages, never mid-send.
    ///
    /// A pending message on a channel without credentials aborts the batch before
    /// anything is sent.
    pub async fn send_all(
        &self,
        messages: &mut [GeneratedMessage],
        cancel: &CancelFlag,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<DispatchSummary, AppError> {
        self.ensure_channels_configured(messages)?;

        let total = messages.len();
        let mut summary = DispatchSummary {
            total,
            ..Default::default()
        };
        let mut attempted = 0usize;

        for index in 0..total {
            if cancel.is_cancelled() {
                tracing::info!("Dispatch cancelled after {} of {} messages", index, total);
                break;
            }

            let message = &mut messages[index];
            if message.status != MessageStatus::Pending {
                summary.skipped += 1;
                tracing::debug!(
                    "Skipping message {} with status {}",
                    message.id,
                    message.status.as_str()
                );
                on_progress(index + 1, total);
                continue;
            }

            let outcome = {
                let snapshot: &GeneratedMessage = message;
                retry_transient(&self.retry, self.sleeper.as_ref(), || self.deliver(snapshot)).await
            };
            let retries = outcome.attempts.saturating_sub(1);
            match outcome.result {
                Ok(()) => {
                    message.mark_sent(retries)?;
                    summary.sent += 1;
                    tracing::info!(
                        "Delivered {} message {} after {} attempt(s)",
                        message.channel.as_str(),
                        message.id,
                        outcome.attempts
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to deliver {} message {} after {} attempt(s): {}",
                        message.channel.as_str(),
                        message.id,
                        outcome.attempts,
                        e
                    );
                    message.mark_failed(e.to_string(), retries)?;
                    summary.failed += 1;
                }
            }

            self.log
                .record(&DeliveryRecord::for_message(message, outcome.attempts))
                .await?;

            attempted += 1;
            on_progress(index + 1, total);

            let more_pending = messages[index + 1..]
                .iter()
                .any(|m| m.status == MessageStatus::Pending);
            if more_pending && !cancel.is_cancelled() {
                let delay = self.pacing.delay_after(attempted);
                if self.pacing.is_long_pause_due(attempted) {
                    tracing::info!("Long pause of {}s after {} sends", delay.as_secs(), attempted);
                }
                self.sleeper.sleep(delay).await;
            }
        }

        tracing::info!(
            "Dispatch finished: {} sent, {} failed, {} skipped, {} total",
            summary.sent,
            summary.failed,
            summary.skipped,
            summary.total
        );
        Ok(summary)
    }
}
