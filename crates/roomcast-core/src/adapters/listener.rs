//! Background consumer of one broker subscription

use super::{BrokerAdapter, BrokerSubscription, SubscriptionId};
use crate::protocol::BrokerEnvelope;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Task that decodes broker messages and hands them to a handler
///
/// The handler returns `false` once its owner is gone, which ends the task.
pub(crate) struct BrokerListener {
    id: SubscriptionId,
    channel: String,
    task: JoinHandle<()>,
}

impl BrokerListener {
    pub(crate) fn spawn<F, Fut>(
        subscription: BrokerSubscription,
        span: tracing::Span,
        handler: F,
    ) -> Self
    where
        F: Fn(BrokerEnvelope) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let BrokerSubscription {
            id,
            channel,
            mut messages,
        } = subscription;
        let task_channel = channel.clone();

        let task = tokio::spawn(
            async move {
                while let Some(raw) = messages.recv().await {
                    let envelope = match BrokerEnvelope::from_json(&raw) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!(channel = %task_channel, error = %e, "Discarding malformed broker message");
                            continue;
                        }
                    };

                    if !handler(envelope).await {
                        break;
                    }
                }
                tracing::debug!(channel = %task_channel, "Broker listener stopped");
            }
            .instrument(span),
        );

        Self { id, channel, task }
    }

    /// Unsubscribe and stop the task
    pub(crate) async fn stop(self, broker: &dyn BrokerAdapter) {
        if let Err(e) = broker.unsubscribe(self.id).await {
            tracing::warn!(channel = %self.channel, error = %e, "Failed to unsubscribe");
        }
        self.task.abort();
    }
}
