use event_bus::consumer_retry::RetryConfig;
use event_bus::{decode_user_created, DecodeError, Delivery};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{field, Instrument, Span};

use crate::dlq::{self, FailedEvent};
use crate::projection::{apply_user_created, ProjectionOutcome};
use crate::store::VehicleStore;

/// Longest body excerpt logged for an unprocessable message
const BODY_PREVIEW_CHARS: usize = 256;

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Projection applied; acked
    Processed { user_id: i64, created: bool },
    /// Unprocessable body; acked and logged
    Dropped(DecodeError),
    /// Returned to the queue for another attempt after `delay`
    Requeued { delay: Duration },
    /// Recorded in `failed_events`; acked
    DeadLettered,
}

/// Decodes, projects and settles USER_CREATED deliveries
pub struct DeliveryHandler {
    store: Arc<dyn VehicleStore>,
    retry: RetryConfig,
}

impl DeliveryHandler {
    pub fn new(store: Arc<dyn VehicleStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Handle one delivery end to end. Every delivery is settled exactly once
    /// before this returns, a panicking projection included (requeued); a
    /// failed settlement is logged and left to broker redelivery.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let span = tracing::info_span!(
            "user_created_delivery",
            subject = %delivery.message.subject,
            attempt = delivery.attempt,
            user_id = field::Empty,
            event_id = field::Empty,
        );

        async {
            let disposition = match AssertUnwindSafe(self.dispatch(&delivery))
                .catch_unwind()
                .await
            {
                Ok(disposition) => disposition,
                Err(_) => {
                    let delay = self.retry.backoff_for(delivery.attempt);
                    tracing::error!(
                        retry_in_ms = delay.as_millis() as u64,
                        "Delivery handler panicked, requeueing"
                    );
                    Disposition::Requeued { delay }
                }
            };
            self.settle(&delivery, &disposition).await;
            disposition
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, delivery: &Delivery) -> Disposition {
        let envelope = match decode_user_created(&delivery.message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    body = %preview(&delivery.message.payload),
                    "Dropping unprocessable message"
                );
                return Disposition::Dropped(e);
            }
        };

        let user_id = envelope.data.id;
        let span = Span::current();
        span.record("user_id", user_id);
        if let Some(event_id) = envelope.event_id {
            span.record("event_id", field::display(event_id));
        }

        let error = match apply_user_created(self.store.as_ref(), &envelope.data).await {
            Ok(outcome) => {
                let created = outcome == ProjectionOutcome::Created;
                if created {
                    tracing::info!("Created placeholder vehicle");
                } else {
                    tracing::debug!("User already has a vehicle, nothing to do");
                }
                return Disposition::Processed { user_id, created };
            }
            Err(e) => e,
        };

        if error.is_transient() && self.retry.allows_retry_after(delivery.attempt) {
            let delay = self.retry.backoff_for(delivery.attempt);
            tracing::warn!(
                error = %error,
                max_attempts = self.retry.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "Projection failed, requeueing"
            );
            return Disposition::Requeued { delay };
        }

        tracing::error!(
            error = %error,
            transient = error.is_transient(),
            "Projection failed, giving up on delivery"
        );
        let failed = FailedEvent::new(&delivery.message, &envelope, error.to_string(), delivery.attempt);

        match dlq::dead_letter(self.store.as_ref(), &failed).await {
            Ok(()) => Disposition::DeadLettered,
            Err(dlq_err) => {
                let delay = self.retry.backoff_for(delivery.attempt);
                tracing::error!(
                    error = %error,
                    dlq_error = %dlq_err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Failed to record dead letter, requeueing"
                );
                Disposition::Requeued { delay }
            }
        }
    }

    async fn settle(&self, delivery: &Delivery, disposition: &Disposition) {
        let settled = match disposition {
            Disposition::Requeued { delay } => delivery.requeue(*delay).await,
            Disposition::Processed { .. } | Disposition::Dropped(_) | Disposition::DeadLettered => {
                delivery.ack().await
            }
        };

        if let Err(e) = settled {
            tracing::warn!(error = %e, "Failed to settle delivery; broker will redeliver");
        }
    }
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= BODY_PREVIEW_CHARS {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(BODY_PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_long_bodies() {
        let long = "x".repeat(1000);

        let shown = preview(long.as_bytes());

        assert_eq!(shown.chars().count(), BODY_PREVIEW_CHARS + 1);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn test_preview_keeps_short_and_binary_bodies() {
        assert_eq!(preview(b"not json"), "not json");
        assert_eq!(preview(&[0xff, b'a']), "\u{fffd}a");
    }
}
