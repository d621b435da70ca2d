// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Consumer
//!
//! `QueueConsumer` owns one connection and one channel, declares its topology
//! once at construction and then runs [`QueueConsumer::delivery_loop`]: deliveries
//! are received one at a time, decoded as UTF-8, handed to the caller's
//! [`ConsumerHandler`] and the returned [`Acknowledgement`] is translated into
//! an ack, a nack without requeue, or nothing.
//!
//! The loop runs on the caller's task. It only suspends while waiting for the
//! next delivery and stops when the cancellation token fires or on a fatal
//! error. Handler failures and panics are turned into nacks and never end the
//! loop.

use crate::{
    channel::{AmqpChannel, DeliverySource, InboundDelivery, LapinChannel, ScopedChannel},
    errors::AmqpError,
    otel,
    topology::{install_consumer, ConsumerTopology},
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span as _, Status},
};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Span};

const DEFAULT_SPAN_NAME: &str = "amqp consume";

/// Outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// No acknowledgement needed, as when consuming in auto-ack mode.
    None,
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement; the message is not requeued.
    Nack,
}

/// Handles the decoded text of each delivery.
///
/// Returning `Err` is treated exactly like [`Acknowledgement::Nack`]. Plain
/// closures `Fn(&str) -> Result<Acknowledgement, AmqpError>` implement this
/// trait.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, message: &str) -> Result<Acknowledgement, AmqpError>;
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&str) -> Result<Acknowledgement, AmqpError> + Send + Sync,
{
    async fn handle(&self, message: &str) -> Result<Acknowledgement, AmqpError> {
        self(message)
    }
}

/// Consumer runtime bound to a declared queue.
pub struct QueueConsumer {
    channel: ScopedChannel,
    deliveries: Box<dyn DeliverySource>,
    topology: ConsumerTopology,
    span: Span,
}

impl QueueConsumer {
    /// Connects to the broker described by the topology and declares it.
    pub async fn connect(topology: ConsumerTopology, span: Span) -> Result<QueueConsumer, AmqpError> {
        let channel = LapinChannel::open(&topology.connection)
            .instrument(span.clone())
            .await?;

        QueueConsumer::declare(topology, Arc::new(channel), span).await
    }

    /// Declares the topology on an already open channel and registers the consumer.
    pub async fn declare(
        topology: ConsumerTopology,
        channel: Arc<dyn AmqpChannel>,
        span: Span,
    ) -> Result<QueueConsumer, AmqpError> {
        let channel = ScopedChannel::new(channel, span.clone());

        let deliveries = install_consumer(channel.get(), &topology)
            .instrument(span.clone())
            .await?;

        Ok(QueueConsumer {
            channel,
            deliveries,
            topology,
            span,
        })
    }

    pub fn topology(&self) -> &ConsumerTopology {
        &self.topology
    }

    /// Receives and handles deliveries until `shutdown` is cancelled.
    ///
    /// # Returns
    /// Ok(()) once cancelled, or the first fatal error: a failed or closed
    /// delivery stream, a body that is not UTF-8, or a failed ack/nack.
    pub async fn delivery_loop<H>(
        &mut self,
        handler: &H,
        shutdown: &CancellationToken,
    ) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + ?Sized,
    {
        let span = self.span.clone();
        let auto_ack = self.topology.consumer.auto_ack;
        let queue = self.topology.queue.name.clone();

        async move {
            let tracer = global::tracer("amqp consumer");
            debug!(queue = queue.as_str(), auto_ack, "starting delivery loop");

            loop {
                if shutdown.is_cancelled() {
                    debug!("delivery loop cancelled");
                    return Ok(());
                }

                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("delivery loop cancelled while waiting");
                        return Ok(());
                    }
                    next = self.deliveries.next_delivery() => next,
                };

                let delivery = match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(err)) => return Err(err),
                    None => {
                        error!(queue = queue.as_str(), "consumer was closed by the broker");
                        return Err(AmqpError::DeliveryStreamError(format!(
                            "consumer on queue `{}` was closed",
                            queue
                        )));
                    }
                };

                consume(&tracer, delivery, handler, self.channel.get(), auto_ack).await?;
            }
        }
        .instrument(span)
        .await
    }

    /// Closes the channel, then the connection.
    ///
    /// Closing twice returns a close-kind error.
    pub async fn close(&mut self) -> Result<(), AmqpError> {
        self.channel.close().await
    }
}

/// Handles a single delivery.
///
/// This function:
/// 1. Opens a consumer span parented on the context carried by the headers
/// 2. Decodes the body as UTF-8, failing the loop when it is not
/// 3. Runs the handler, turning errors and panics into a Nack
/// 4. Acks or nacks the delivery unless the consumer runs in auto-ack mode
pub(crate) async fn consume<H>(
    tracer: &BoxedTracer,
    delivery: InboundDelivery,
    handler: &H,
    channel: &dyn AmqpChannel,
    auto_ack: bool,
) -> Result<(), AmqpError>
where
    H: ConsumerHandler + ?Sized,
{
    let delivery_tag = delivery.delivery_tag;
    let span_name = match delivery.properties.kind() {
        Some(value) => value.to_string(),
        _ => DEFAULT_SPAN_NAME.to_owned(),
    };
    let (_, mut span) = otel::new_span(&delivery.properties, tracer, &span_name);

    debug!(delivery_tag, "received delivery");

    let message = match String::from_utf8(delivery.data) {
        Ok(message) => message,
        Err(err) => {
            error!(error = err.to_string(), delivery_tag, "failure to parse message");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to parse message"),
            });
            return Err(AmqpError::ParsePayloadError(err.to_string()));
        }
    };

    let verdict = match AssertUnwindSafe(handler.handle(&message))
        .catch_unwind()
        .await
    {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(err)) => {
            warn!(error = err.to_string(), delivery_tag, "error whiling handling msg");
            span.record_error(&err);
            Acknowledgement::Nack
        }
        Err(_) => {
            error!(delivery_tag, "handler panicked while handling msg");
            Acknowledgement::Nack
        }
    };

    if auto_ack {
        if verdict == Acknowledgement::Nack {
            warn!(
                delivery_tag,
                body = message.as_str(),
                "message was auto-acknowledged and cannot be rejected"
            );
            span.set_status(Status::Error {
                description: Cow::from("message rejected"),
            });
        }
        return Ok(());
    }

    match verdict {
        Acknowledgement::Ack => {
            if let Err(err) = channel.basic_ack(delivery_tag).await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(err);
            }
            debug!(delivery_tag, "message successfully processed");
            span.set_status(Status::Ok);
        }
        Acknowledgement::Nack => {
            if let Err(err) = channel.basic_nack(delivery_tag, false).await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to nack msg"),
                });
                return Err(err);
            }
            warn!(delivery_tag, body = message.as_str(), "rejected message");
            span.set_status(Status::Error {
                description: Cow::from("message rejected"),
            });
        }
        Acknowledgement::None => {
            debug!(delivery_tag, "no acknowledgement required");
        }
    }

    Ok(())
}
