//! The broker-facing half of the worker: connects to the durable, DLX-backed
//! queue for this process's channel, dispatches each message to the
//! orchestrator, and acks/nacks according to the returned [`HandlerOutcome`].

use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::{broadcast, Semaphore};

use crate::config::BrokerConfig;
use crate::domain::DeliveryJob;
use crate::metrics::{
    BROKER_CONNECTION_STATUS, BROKER_RECONNECTS_TOTAL, QUEUE_IN_FLIGHT, QUEUE_MESSAGES_ACKED_TOTAL,
    QUEUE_MESSAGES_CONSUMED_TOTAL, QUEUE_MESSAGES_DEAD_LETTERED_TOTAL, QUEUE_MESSAGES_REQUEUED_TOTAL,
};
use crate::orchestrator::DeliveryOrchestrator;
use crate::pipeline::HandlerOutcome;
use crate::resilience::{BackoffConfig, ExponentialBackoff};

const DEAD_LETTER_EXCHANGE: &str = "notifyfabric.dlx";

/// Non-blocking check for whether `shutdown` has already fired, without
/// consuming a future send on the channel.
fn shutdown_signaled(shutdown: &mut broadcast::Receiver<()>) -> bool {
    matches!(
        shutdown.try_recv(),
        Ok(()) | Err(broadcast::error::TryRecvError::Closed)
    )
}

pub struct QueueConsumer {
    config: BrokerConfig,
    orchestrator: Arc<DeliveryOrchestrator>,
    concurrency: Arc<Semaphore>,
}

impl QueueConsumer {
    pub fn new(config: BrokerConfig, orchestrator: Arc<DeliveryOrchestrator>, max_concurrent: usize) -> Self {
        Self {
            config,
            orchestrator,
            concurrency: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Runs until `shutdown` fires. Reconnects with jittered backoff on
    /// connection loss; gives up and returns an error once the backoff is
    /// exhausted, which `main` treats as fatal for this process.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), crate::error::AppError> {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            base_delay_ms: self.config.reconnect_base_delay_ms,
            max_delay_ms: self.config.reconnect_base_delay_ms * 20,
            max_attempts: self.config.reconnect_attempts,
            jitter_factor: 0.2,
        });

        loop {
            match self.connect_and_consume(shutdown.resubscribe()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    BROKER_CONNECTION_STATUS.set(0);
                    if shutdown_signaled(&mut shutdown) {
                        return Ok(());
                    }

                    match backoff.next_delay() {
                        Some(delay) => {
                            BROKER_RECONNECTS_TOTAL.inc();
                            tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "broker connection lost, reconnecting");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.recv() => return Ok(()),
                            }
                        }
                        None => {
                            tracing::error!(error = %e, "broker reconnect attempts exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_consume(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), crate::error::AppError> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(crate::error::AppError::Broker)?;
        let channel = connection.create_channel().await.map_err(crate::error::AppError::Broker)?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(crate::error::AppError::Broker)?;

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            DEAD_LETTER_EXCHANGE.into(),
        );
        queue_args.insert(
            "x-dead-letter-routing-key".into(),
            self.config.dlq_routing_key.clone().into(),
        );

        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await
            .map_err(crate::error::AppError::Broker)?;

        BROKER_CONNECTION_STATUS.set(1);

        let mut consumer = channel
            .basic_consume(
                &self.config.queue_name,
                "notify-fabric-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(crate::error::AppError::Broker)?;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested, stopping consumer loop");
                    return Ok(());
                }
                next = consumer.next() => {
                    let Some(delivery) = next else {
                        return Err(crate::error::AppError::Internal("broker consumer stream ended".to_string()));
                    };
                    let delivery = delivery.map_err(crate::error::AppError::Broker)?;

                    QUEUE_MESSAGES_CONSUMED_TOTAL.inc();
                    QUEUE_IN_FLIGHT.inc();

                    let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore not closed");
                    let orchestrator = self.orchestrator.clone();
                    let delivery_for_task = delivery;

                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = match serde_json::from_slice::<DeliveryJob>(&delivery_for_task.data) {
                            Ok(job) => orchestrator.handle(job).await,
                            Err(e) => {
                                tracing::warn!(error = %e, "malformed job payload, dead-lettering");
                                HandlerOutcome::PermanentFailure
                            }
                        };

                        match outcome {
                            HandlerOutcome::Ack => {
                                if let Err(e) = delivery_for_task.ack(BasicAckOptions::default()).await {
                                    tracing::error!(error = %e, "failed to ack message");
                                } else {
                                    QUEUE_MESSAGES_ACKED_TOTAL.inc();
                                }
                            }
                            HandlerOutcome::TransientFailure => {
                                if let Err(e) = delivery_for_task
                                    .nack(BasicNackOptions { requeue: true, ..Default::default() })
                                    .await
                                {
                                    tracing::error!(error = %e, "failed to nack message for requeue");
                                } else {
                                    QUEUE_MESSAGES_REQUEUED_TOTAL.inc();
                                }
                            }
                            HandlerOutcome::PermanentFailure => {
                                if let Err(e) = delivery_for_task
                                    .nack(BasicNackOptions { requeue: false, ..Default::default() })
                                    .await
                                {
                                    tracing::error!(error = %e, "failed to nack message to dead-letter queue");
                                } else {
                                    QUEUE_MESSAGES_DEAD_LETTERED_TOTAL.inc();
                                }
                            }
                        }

                        QUEUE_IN_FLIGHT.dec();
                    });
                }
            }
        }
    }
}
