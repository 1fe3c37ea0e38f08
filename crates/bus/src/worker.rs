//! Delivery worker pool and sweeper
//!
//! Workers claim due pending rows from the store, invoke the recipient's
//! handler outside any lock, and write the resulting transition. The
//! sweeper expires TTL'd rows, requeues failed rows whose backoff lapsed,
//! and dead-letters rows with exhausted retries. Only persisted rows are
//! ever considered, so a worker crash resumes cleanly.

use chrono::{Duration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sentinel_core::{AttemptOutcome, CancelSource, CancelToken, DeliveryAttempt, Message};

use crate::backoff::backoff_delay;
use crate::bus::MessageBus;

/// Handle to the spawned worker pool and sweeper.
pub struct BusRunner {
    cancel: CancelSource,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl BusRunner {
    /// Spawn the configured number of delivery workers plus the
    /// single-instance sweeper.
    pub fn start(bus: Arc<MessageBus>) -> Self {
        let cancel = CancelSource::new();
        let mut tasks = Vec::new();

        for worker_id in 0..bus.config().workers {
            let bus = bus.clone();
            let token = cancel.token();
            tasks.push(tokio::spawn(async move {
                worker_loop(bus, token, worker_id).await;
            }));
        }

        let sweeper_bus = bus.clone();
        let sweeper_token = cancel.token();
        tasks.push(tokio::spawn(async move {
            sweeper_loop(sweeper_bus, sweeper_token).await;
        }));

        tracing::info!(workers = bus.config().workers, "message bus workers started");
        Self { cancel, tasks }
    }

    /// Stop workers and wait for them to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("message bus workers stopped");
    }
}

async fn worker_loop(bus: Arc<MessageBus>, token: CancelToken, worker_id: usize) {
    let poll_interval = std::time::Duration::from_millis(bus.config().poll_interval_ms);
    let lease = Duration::milliseconds(bus.config().claim_lease_ms as i64);
    let batch_size = bus.config().batch_size;
    let wake = bus.wake_handle();

    tracing::debug!(worker_id, "delivery worker started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }

        // Drain everything currently due before sleeping again.
        loop {
            if token.is_cancelled() {
                return;
            }
            let batch = match bus.store().claim_due(Utc::now(), batch_size, lease).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "claim failed");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            for message in batch {
                if token.is_cancelled() {
                    return;
                }
                deliver_one(&bus, message).await;
            }
        }
    }
    tracing::debug!(worker_id, "delivery worker stopped");
}

/// One delivery attempt for one claimed row.
async fn deliver_one(bus: &MessageBus, message: Message) {
    let recipient = match &message.to_agent {
        Some(recipient) => recipient.clone(),
        // A recipient-less row cannot reach this path through send or
        // broadcast; treat it as corrupt rather than retrying forever.
        None => {
            tracing::error!(message_id = %message.message_id, "claimed row has no recipient");
            return;
        }
    };

    let handler_timeout = std::time::Duration::from_millis(bus.config().handler_timeout_ms);
    let outcome = match bus.handler_for(&recipient) {
        Some(handler) => {
            match tokio::time::timeout(handler_timeout, handler.handle(&message)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("handler rejected: {e}")),
                Err(_) => Err(format!(
                    "handler timed out after {}ms",
                    bus.config().handler_timeout_ms
                )),
            }
        }
        None => Err(format!("recipient {recipient} unreachable")),
    };

    let now = Utc::now();
    let attempt_number = message.retry_count + 1;

    match outcome {
        Ok(()) => {
            if let Err(e) = bus.store().mark_delivered(message.message_id, now).await {
                // Lost the race with the sweeper (row expired mid-flight).
                tracing::debug!(message_id = %message.message_id, error = %e, "delivery not recorded");
                return;
            }
            let latency_ms = (now - message.created_at).num_milliseconds().max(0) as u64;
            bus.counters().record_delivery_latency(latency_ms);
            metrics::counter!("sentinel_bus_delivered_total").increment(1);
            record_attempt(bus, &message, attempt_number, AttemptOutcome::Delivered, None).await;
            tracing::trace!(message_id = %message.message_id, to = %recipient, "delivered");
        }
        Err(error) => {
            let delay = backoff_delay(
                bus.config().base_delay_ms,
                bus.config().max_backoff_ms,
                message.retry_count,
            );
            let new_count = (message.retry_count + 1).min(message.max_retries);
            if let Err(e) = bus
                .store()
                .mark_failed(message.message_id, &error, new_count, now + delay)
                .await
            {
                tracing::debug!(message_id = %message.message_id, error = %e, "failure not recorded");
                return;
            }
            metrics::counter!("sentinel_bus_failed_total").increment(1);
            record_attempt(
                bus,
                &message,
                attempt_number,
                AttemptOutcome::Failed,
                Some(error.clone()),
            )
            .await;
            tracing::debug!(
                message_id = %message.message_id,
                to = %recipient,
                retry_count = new_count,
                max_retries = message.max_retries,
                error = %error,
                "delivery failed"
            );
        }
    }
}

async fn record_attempt(
    bus: &MessageBus,
    message: &Message,
    attempt_number: u32,
    outcome: AttemptOutcome,
    error: Option<String>,
) {
    let attempt = DeliveryAttempt {
        message_id: message.message_id,
        attempt_number,
        attempted_at: Utc::now(),
        outcome,
        error,
    };
    if let Err(e) = bus.store().record_attempt(&attempt).await {
        tracing::warn!(message_id = %message.message_id, error = %e, "attempt not recorded");
    }
}

async fn sweeper_loop(bus: Arc<MessageBus>, token: CancelToken) {
    let interval = std::time::Duration::from_millis(bus.config().sweep_interval_ms);
    let wake = bus.wake_handle();

    tracing::debug!("bus sweeper started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match bus.store().sweep_expired(Utc::now()).await {
            Ok(swept) if !swept.is_empty() => {
                metrics::counter!("sentinel_bus_expired_total").increment(swept.len() as u64);
                tracing::debug!(count = swept.len(), "expired messages swept");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
        }

        match bus.store().requeue_failed_due(Utc::now()).await {
            Ok(0) => {}
            Ok(requeued) => {
                tracing::trace!(count = requeued, "failed messages requeued");
                wake.notify_waiters();
            }
            Err(e) => tracing::warn!(error = %e, "requeue sweep failed"),
        }

        match bus.store().sweep_dead().await {
            Ok(swept) if !swept.is_empty() => {
                bus.counters()
                    .dead_letter
                    .fetch_add(swept.len() as u64, Ordering::Relaxed);
                metrics::counter!("sentinel_bus_dead_letter_total").increment(swept.len() as u64);
                tracing::warn!(count = swept.len(), "messages dead-lettered");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "dead-letter sweep failed"),
        }
    }
    tracing::debug!("bus sweeper stopped");
}
