// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Specifications and Installation
//!
//! This module holds the immutable topology values the builder produces and the
//! functions installing them on a broker channel.
//!
//! The main components are:
//! - `ConsumerTopology`: connection + queue + exchange + consumer settings
//! - `PublisherTopology`: connection + publisher settings
//! - `install_consumer` / `install_publisher`: the ordered declare sequences

use crate::{
    channel::{AmqpChannel, DeliverySource},
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::{ExchangeKind, ExchangeSpec},
    queue::QueueSpec,
};
use std::sync::Arc;
use tracing::debug;

/// Routing key used by the publisher when none applies (fanout).
pub const DEFAULT_ROUTING_KEY: &str = "#";

/// Consumer-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub(crate) auto_ack: bool,
}

impl Default for ConsumerSpec {
    fn default() -> Self {
        ConsumerSpec { auto_ack: true }
    }
}

impl ConsumerSpec {
    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }
}

/// Publisher-side settings: the exchange to declare and where to route messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSpec {
    pub(crate) exchange_name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) routing_key: String,
}

impl PublisherSpec {
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

/// Everything a [`QueueConsumer`](crate::consumer::QueueConsumer) declares.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerTopology {
    pub(crate) connection: Arc<ConnectionConfig>,
    pub(crate) queue: QueueSpec,
    pub(crate) exchange: ExchangeSpec,
    pub(crate) consumer: ConsumerSpec,
}

impl ConsumerTopology {
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    pub fn consumer(&self) -> &ConsumerSpec {
        &self.consumer
    }
}

/// Everything a [`QueuePublisher`](crate::publisher::QueuePublisher) declares.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherTopology {
    pub(crate) connection: Arc<ConnectionConfig>,
    pub(crate) publisher: PublisherSpec,
}

impl PublisherTopology {
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn publisher(&self) -> &PublisherSpec {
        &self.publisher
    }
}

/// Declares the consumer topology.
///
/// This method performs the following operations in order:
/// 1. Declares the exchange
/// 2. Declares the queue with the limits that were set
/// 3. Registers the consumer on the queue
/// 4. Binds the queue to the exchange once per binding key
///
/// The first failure aborts the sequence. Whatever was already declared stays
/// on the broker.
pub(crate) async fn install_consumer(
    channel: &dyn AmqpChannel,
    topology: &ConsumerTopology,
) -> Result<Box<dyn DeliverySource>, AmqpError> {
    let exchange = &topology.exchange;
    let queue = &topology.queue;

    debug!("creating exchange: {}", exchange.name);
    channel
        .exchange_declare(&exchange.name, exchange.kind, exchange.durable)
        .await?;
    debug!("exchange: {} was created", exchange.name);

    debug!("creating queue: {}", queue.name);
    channel
        .queue_declare(&queue.name, queue.declare_options(), queue.arguments())
        .await?;
    debug!("queue: {} was created", queue.name);

    let deliveries = channel
        .basic_consume(&queue.name, topology.consumer.auto_ack)
        .await?;

    for key in &exchange.binding_keys {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue.name, exchange.name, key
        );
        channel
            .queue_bind(&queue.name, &exchange.name, key)
            .await?;
    }

    debug!("queue was bounded");

    Ok(deliveries)
}

/// Declares the exchange a publisher sends to.
pub(crate) async fn install_publisher(
    channel: &dyn AmqpChannel,
    topology: &PublisherTopology,
) -> Result<(), AmqpError> {
    let publisher = &topology.publisher;

    debug!("creating exchange: {}", publisher.exchange_name);
    channel
        .exchange_declare(&publisher.exchange_name, publisher.kind, publisher.durable)
        .await?;
    debug!("exchange: {} was created", publisher.exchange_name);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{MockAmqpChannel, MockDeliverySource},
        queue::AMQP_HEADERS_MAX_LENGTH,
    };
    use lapin::types::AMQPValue;
    use mockall::Sequence;

    fn no_deliveries() -> Box<dyn DeliverySource> {
        Box::new(MockDeliverySource::new())
    }

    fn consumer_topology(kind: ExchangeKind, keys: &[&str]) -> ConsumerTopology {
        ConsumerTopology {
            connection: Arc::new(ConnectionConfig::new("guest", "guest", "localhost", 5672)),
            queue: QueueSpec {
                max_length: Some(100),
                durable: true,
                ..QueueSpec::new("q1")
            },
            exchange: ExchangeSpec::new(
                "ex1",
                kind,
                true,
                keys.iter().map(|k| k.to_string()).collect(),
            ),
            consumer: ConsumerSpec { auto_ack: false },
        }
    }

    #[tokio::test]
    async fn should_declare_consumer_topology_in_order() {
        let topology = consumer_topology(ExchangeKind::Topic, &["a.#", "b.*"]);
        let mut channel = MockAmqpChannel::new();
        let mut seq = Sequence::new();

        channel
            .expect_exchange_declare()
            .withf(|name, kind, durable| name == "ex1" && *kind == ExchangeKind::Topic && *durable)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .withf(|name, options, args| {
                name == "q1"
                    && options.durable
                    && !options.exclusive
                    && args.inner().len() == 1
                    && args.inner().get(AMQP_HEADERS_MAX_LENGTH)
                        == Some(&AMQPValue::LongLongInt(100))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_basic_consume()
            .withf(|queue, auto_ack| queue == "q1" && !*auto_ack)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(no_deliveries()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key| queue == "q1" && exchange == "ex1" && key == "a.#")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key| queue == "q1" && exchange == "ex1" && key == "b.*")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        assert!(install_consumer(&channel, &topology).await.is_ok());
    }

    #[tokio::test]
    async fn should_bind_fanout_once_with_empty_key() {
        let topology = consumer_topology(ExchangeKind::Fanout, &["ignored"]);
        let mut channel = MockAmqpChannel::new();

        channel
            .expect_exchange_declare()
            .returning(|_, _, _| Ok(()));
        channel.expect_queue_declare().returning(|_, _, _| Ok(()));
        channel
            .expect_basic_consume()
            .returning(|_, _| Ok(no_deliveries()));
        channel
            .expect_queue_bind()
            .withf(|_, _, key| key.is_empty())
            .times(1)
            .returning(|_, _, _| Ok(()));

        assert!(install_consumer(&channel, &topology).await.is_ok());
    }

    #[tokio::test]
    async fn should_stop_at_first_failing_binding() {
        let topology = consumer_topology(ExchangeKind::Direct, &["first", "second", "third"]);
        let mut channel = MockAmqpChannel::new();

        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_basic_consume()
            .times(1)
            .returning(|_, _| Ok(no_deliveries()));
        channel
            .expect_queue_bind()
            .withf(|_, _, key| key == "first")
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .withf(|_, _, key| key == "second")
            .times(1)
            .returning(|queue, exchange, key| {
                Err(AmqpError::BindingExchangeToQueueError {
                    exchange: exchange.to_owned(),
                    queue: queue.to_owned(),
                    key: key.to_owned(),
                    cause: "NOT_FOUND".to_owned(),
                })
            });
        channel
            .expect_queue_bind()
            .withf(|_, _, key| key == "third")
            .never();

        let err = install_consumer(&channel, &topology)
            .await
            .err()
            .expect("binding failure");
        assert_eq!(err.kind(), crate::errors::ErrorKind::Declare);
    }

    #[tokio::test]
    async fn should_not_declare_queue_when_exchange_fails() {
        let topology = consumer_topology(ExchangeKind::Topic, &["a"]);
        let mut channel = MockAmqpChannel::new();

        channel.expect_exchange_declare().returning(|name, _, _| {
            Err(AmqpError::DeclareExchangeError(
                name.to_owned(),
                "PRECONDITION_FAILED".to_owned(),
            ))
        });
        channel.expect_queue_declare().never();
        channel.expect_basic_consume().never();
        channel.expect_queue_bind().never();

        let err = install_consumer(&channel, &topology)
            .await
            .err()
            .expect("declare failure");
        assert_eq!(
            err,
            AmqpError::DeclareExchangeError("ex1".to_owned(), "PRECONDITION_FAILED".to_owned())
        );
    }

    #[tokio::test]
    async fn should_declare_publisher_exchange() {
        let topology = PublisherTopology {
            connection: Arc::new(ConnectionConfig::new("guest", "guest", "localhost", 5672)),
            publisher: PublisherSpec {
                exchange_name: "ex1".to_owned(),
                kind: ExchangeKind::Direct,
                durable: false,
                routing_key: "rk1".to_owned(),
            },
        };
        let mut channel = MockAmqpChannel::new();

        channel
            .expect_exchange_declare()
            .withf(|name, kind, durable| {
                name == "ex1" && *kind == ExchangeKind::Direct && !*durable
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        assert!(install_publisher(&channel, &topology).await.is_ok());
    }
}
