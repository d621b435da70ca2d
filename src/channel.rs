// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and channels and
//! defines the seam the runtimes talk to. [`AmqpChannel`] covers exactly the
//! protocol calls the DSL issues (declares, consume, ack/nack, publish,
//! close) and [`DeliverySource`] yields the deliveries of one consumer.
//! [`LapinChannel`] implements both against a real broker through `lapin`.

use crate::{config::ConnectionConfig, errors::AmqpError, exchange::ExchangeKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
#[cfg(test)]
use mockall::automock;
use std::{future::Future, sync::Arc};
use tokio::runtime::Handle;
use tracing::{debug, error, warn, Instrument, Span};

const REPLY_SUCCESS: u16 = 200;

/// One message received from the broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
}

/// Stream of deliveries of a registered consumer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeliverySource: Send {
    /// Waits for the next delivery. `None` means the broker closed the consumer.
    async fn next_delivery(&mut self) -> Option<Result<InboundDelivery, AmqpError>>;
}

/// The broker operations the consumer and publisher runtimes rely on.
///
/// Implementations map their transport failures into the matching
/// [`AmqpError`] variant so callers only propagate.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    /// Registers a consumer on the queue. With `auto_ack` the broker considers
    /// every delivery acknowledged as soon as it is sent.
    async fn basic_consume(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Box<dyn DeliverySource>, AmqpError>;

    async fn queue_bind(&self, queue: &str, exchange: &str, key: &str) -> Result<(), AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Closes the channel, then the connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Channel owned by a runtime, released exactly once.
///
/// `close` reports a second call as a close-kind error. When dropped without
/// being closed inside a tokio runtime, the release is scheduled on that
/// runtime instead.
pub(crate) struct ScopedChannel {
    channel: Arc<dyn AmqpChannel>,
    span: Span,
    closed: bool,
}

impl ScopedChannel {
    pub(crate) fn new(channel: Arc<dyn AmqpChannel>, span: Span) -> ScopedChannel {
        ScopedChannel {
            channel,
            span,
            closed: false,
        }
    }

    pub(crate) fn get(&self) -> &dyn AmqpChannel {
        self.channel.as_ref()
    }

    pub(crate) async fn close(&mut self) -> Result<(), AmqpError> {
        if self.closed {
            return Err(AmqpError::CloseError(
                "channel and connection already closed".to_owned(),
            ));
        }
        self.closed = true;

        debug!(parent: &self.span, "closing amqp channel and connection...");
        self.channel.close().instrument(self.span.clone()).await?;
        debug!(parent: &self.span, "amqp channel and connection closed");

        Ok(())
    }
}

impl Drop for ScopedChannel {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(parent: &self.span, "amqp channel dropped outside a runtime without being closed");
            return;
        };

        let channel = self.channel.clone();
        handle.spawn(
            async move {
                if let Err(err) = channel.close().await {
                    error!(error = err.to_string(), "failure to release dropped channel");
                }
            }
            .instrument(self.span.clone()),
        );
    }
}

/// Creates a new AMQP connection and a channel on it.
///
/// # Parameters
/// * `cfg` - Connection details: credentials, host, port and optional connection name
///
/// # Returns
/// The connection and channel on success, or a connection-kind error on failure.
pub async fn new_amqp_channel(cfg: &ConnectionConfig) -> Result<(Connection, Channel), AmqpError> {
    debug!("creating amqp connection...");
    let mut options = ConnectionProperties::default();
    if let Some(name) = cfg.connection_name() {
        options = options.with_connection_name(LongString::from(name.to_owned()));
    }

    let conn = match Connection::connect(&cfg.amqp_uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(
                error = err.to_string(),
                host = cfg.host(),
                port = cfg.port(),
                "failure to connect"
            );
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((conn, c))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

/// `lapin`-backed channel owning its connection.
pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
}

impl LapinChannel {
    /// Connects to the broker and opens a channel.
    pub async fn open(cfg: &ConnectionConfig) -> Result<LapinChannel, AmqpError> {
        let (connection, channel) = new_amqp_channel(cfg).await?;
        Ok(LapinChannel {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = name,
                    "error to declare the exchange"
                );
                AmqpError::DeclareExchangeError(name.to_owned(), err.to_string())
            })
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        match self.channel.queue_declare(name, options, arguments).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(name.to_owned(), err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Box<dyn DeliverySource>, AmqpError> {
        match self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(
                    queue.to_owned(),
                    err.to_string(),
                ))
            }
            Ok(consumer) => Ok(Box::new(consumer)),
        }
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, key: &str) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError {
                    exchange: exchange.to_owned(),
                    queue: queue.to_owned(),
                    key: key.to_owned(),
                    cause: err.to_string(),
                }
            })
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError(delivery_tag, err.to_string())
            })
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling nack msg");
                AmqpError::NackMessageError(delivery_tag, err.to_string())
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        release(
            self.channel.close(REPLY_SUCCESS, "OK"),
            self.connection.close(REPLY_SUCCESS, "OK"),
        )
        .await
    }
}

/// Awaits the channel close, then the connection close.
///
/// The connection close is attempted even when the channel close failed. The
/// first failure is reported.
async fn release<C, N>(channel: C, connection: N) -> Result<(), AmqpError>
where
    C: Future<Output = lapin::Result<()>>,
    N: Future<Output = lapin::Result<()>>,
{
    let channel = channel.await;
    if let Err(err) = &channel {
        error!(error = err.to_string(), "error closing the channel");
    }

    let connection = connection.await;
    if let Err(err) = &connection {
        error!(error = err.to_string(), "error closing the connection");
    }

    channel
        .and(connection)
        .map_err(|err| AmqpError::CloseError(err.to_string()))
}

#[async_trait]
impl DeliverySource for Consumer {
    async fn next_delivery(&mut self) -> Option<Result<InboundDelivery, AmqpError>> {
        let result = self.next().await?;

        Some(match result {
            Ok(delivery) => Ok(InboundDelivery {
                delivery_tag: delivery.delivery_tag,
                data: delivery.data,
                properties: delivery.properties,
            }),
            Err(err) => {
                error!(error = err.to_string(), "errors consume msg");
                Err(AmqpError::DeliveryStreamError(err.to_string()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use lapin::{ChannelState, ConnectionState};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    #[tokio::test]
    async fn should_close_only_once() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_close().times(1).returning(|| Ok(()));
        let mut scoped = ScopedChannel::new(Arc::new(channel), Span::none());

        assert!(scoped.close().await.is_ok());

        let err = scoped.close().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Close);
    }

    #[tokio::test]
    async fn should_not_retry_failed_close() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_close()
            .times(1)
            .returning(|| Err(AmqpError::CloseError("connection reset".to_owned())));
        let mut scoped = ScopedChannel::new(Arc::new(channel), Span::none());

        assert_eq!(
            scoped.close().await,
            Err(AmqpError::CloseError("connection reset".to_owned()))
        );
        assert_eq!(scoped.close().await.unwrap_err().kind(), ErrorKind::Close);
    }

    #[tokio::test]
    async fn should_release_on_drop_when_not_closed() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let mut channel = MockAmqpChannel::new();
        channel.expect_close().times(1).returning(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        drop(ScopedChannel::new(Arc::new(channel), Span::none()));

        for _ in 0..10 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn should_not_release_again_on_drop_after_close() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_close().times(1).returning(|| Ok(()));
        let mut scoped = ScopedChannel::new(Arc::new(channel), Span::none());

        scoped.close().await.unwrap();
        drop(scoped);
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn should_close_channel_before_connection() {
        let steps = Mutex::new(Vec::new());

        let result = release(
            async {
                steps.lock().unwrap().push("channel");
                Ok(())
            },
            async {
                steps.lock().unwrap().push("connection");
                Ok(())
            },
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(*steps.lock().unwrap(), vec!["channel", "connection"]);
    }

    #[tokio::test]
    async fn should_close_connection_when_channel_close_fails() {
        let channel_err = lapin::Error::InvalidChannelState(ChannelState::Closed);
        let expected = AmqpError::CloseError(channel_err.to_string());
        let connection_closed = AtomicBool::new(false);

        let result = release(async { Err(channel_err) }, async {
            connection_closed.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(connection_closed.load(Ordering::SeqCst));
        assert_eq!(result, Err(expected));
    }

    #[tokio::test]
    async fn should_report_first_close_failure() {
        let channel_err = lapin::Error::InvalidChannelState(ChannelState::Closed);
        let connection_err = lapin::Error::InvalidConnectionState(ConnectionState::Closed);
        let expected = AmqpError::CloseError(channel_err.to_string());

        let result = release(async { Err(channel_err) }, async { Err(connection_err) }).await;

        assert_eq!(result, Err(expected));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Close);
    }

    #[tokio::test]
    async fn should_report_connection_close_failure() {
        let connection_err = lapin::Error::InvalidConnectionState(ConnectionState::Closed);
        let expected = AmqpError::CloseError(connection_err.to_string());

        let result = release(async { Ok(()) }, async { Err(connection_err) }).await;

        assert_eq!(result, Err(expected));
    }
}
