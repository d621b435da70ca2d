// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Fluent Topology Builder
//!
//! A staged builder describing either a publisher or a consumer. Every stage is
//! its own type exposing only the calls legal at that point, and the chain ends
//! with `build()`, which connects to the broker and declares the topology.
//!
//! ```no_run
//! # async fn run() -> Result<(), amqp_dsl::errors::AmqpError> {
//! use amqp_dsl::{builder::QueueBuilder, consumer::Acknowledgement};
//! use tokio_util::sync::CancellationToken;
//!
//! let broker = QueueBuilder::connect_to("guest", "guest", "localhost", 5672);
//!
//! let publisher = broker
//!     .publish_to_durable_exchange("orders")
//!     .on_topic("order.created")
//!     .build()
//!     .await?;
//! publisher.publish(r#"{"id":7}"#).await?;
//!
//! let mut consumer = broker
//!     .consume_from_queue("billing")
//!     .queue_msg_ttl(60_000)
//!     .auto_ack(false)
//!     .from_topic(["order.*"])
//!     .from_durable_exchange("orders")
//!     .build()
//!     .await?;
//!
//! let handler = |_: &str| -> Result<Acknowledgement, amqp_dsl::errors::AmqpError> {
//!     Ok(Acknowledgement::Ack)
//! };
//! consumer.delivery_loop(&handler, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Choosing `fanout()` on the consumer stage replaces any binding keys passed
//! earlier in the chain with a single empty key, silently.

use crate::{
    channel::AmqpChannel,
    config::ConnectionConfig,
    consumer::QueueConsumer,
    errors::AmqpError,
    exchange::{ExchangeKind, ExchangeSpec},
    publisher::QueuePublisher,
    queue::QueueSpec,
    topology::{
        ConsumerSpec, ConsumerTopology, PublisherSpec, PublisherTopology, DEFAULT_ROUTING_KEY,
    },
};
use lapin::BasicProperties;
use std::sync::Arc;
use tracing::Span;

/// Entry point of the fluent API.
pub struct QueueBuilder;

impl QueueBuilder {
    /// Starts a chain for the broker at `host:port`.
    pub fn connect_to(user: &str, password: &str, host: &str, port: u16) -> Connect {
        QueueBuilder::from_config(ConnectionConfig::new(user, password, host, port))
    }

    /// Starts a chain from an existing configuration, e.g. [`ConnectionConfig::from_env`].
    pub fn from_config(config: ConnectionConfig) -> Connect {
        let span = tracing::info_span!("amqp", host = config.host(), port = config.port());
        Connect {
            config: Arc::new(config),
            span,
        }
    }
}

/// Connection stage: choose message properties, then a publisher or consumer role.
///
/// Role methods borrow the stage, so one connection description can feed any
/// number of publishers and consumers.
#[derive(Debug, Clone)]
pub struct Connect {
    config: Arc<ConnectionConfig>,
    span: Span,
}

impl Connect {
    /// Default properties attached to every published message.
    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.config = Arc::new(Arc::unwrap_or_clone(self.config).with_properties(properties));
        self
    }

    pub fn with_connection_name(mut self, name: &str) -> Self {
        self.config = Arc::new(Arc::unwrap_or_clone(self.config).with_connection_name(name));
        self
    }

    /// Span the runtimes built from this chain emit their events in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn publish_to_exchange(&self, exchange: &str) -> PublisherStage {
        self.publisher(exchange, false)
    }

    pub fn publish_to_durable_exchange(&self, exchange: &str) -> PublisherStage {
        self.publisher(exchange, true)
    }

    pub fn consume_from_queue(&self, queue: &str) -> ConsumerStage {
        ConsumerStage {
            connect: self.clone(),
            queue: QueueSpec::new(queue),
            consumer: ConsumerSpec::default(),
            kind: ExchangeKind::Topic,
            binding_keys: vec![],
        }
    }

    fn publisher(&self, exchange: &str, durable: bool) -> PublisherStage {
        PublisherStage {
            connect: self.clone(),
            exchange: exchange.to_owned(),
            durable,
        }
    }
}

/// Publisher stage: choose how messages are routed.
#[derive(Debug, Clone)]
pub struct PublisherStage {
    connect: Connect,
    exchange: String,
    durable: bool,
}

impl PublisherStage {
    pub fn on_topic(self, routing_key: &str) -> PublisherBuilder {
        self.route(ExchangeKind::Topic, routing_key)
    }

    pub fn directly_to(self, routing_key: &str) -> PublisherBuilder {
        self.route(ExchangeKind::Direct, routing_key)
    }

    pub fn fanout(self) -> PublisherBuilder {
        self.route(ExchangeKind::Fanout, DEFAULT_ROUTING_KEY)
    }

    fn route(self, kind: ExchangeKind, routing_key: &str) -> PublisherBuilder {
        PublisherBuilder {
            span: self.connect.span,
            topology: PublisherTopology {
                connection: self.connect.config,
                publisher: PublisherSpec {
                    exchange_name: self.exchange,
                    kind,
                    durable: self.durable,
                    routing_key: routing_key.to_owned(),
                },
            },
        }
    }
}

/// Terminal publisher stage.
#[derive(Debug, Clone)]
pub struct PublisherBuilder {
    topology: PublisherTopology,
    span: Span,
}

impl PublisherBuilder {
    /// The assembled topology, without connecting.
    pub fn topology(&self) -> PublisherTopology {
        self.topology.clone()
    }

    /// Connects to the broker and declares the exchange.
    pub async fn build(self) -> Result<QueuePublisher, AmqpError> {
        QueuePublisher::connect(self.topology, self.span).await
    }

    /// Declares the exchange on a channel the caller already opened.
    pub async fn build_on(self, channel: Arc<dyn AmqpChannel>) -> Result<QueuePublisher, AmqpError> {
        QueuePublisher::declare(self.topology, channel, self.span).await
    }
}

/// Consumer stage: queue attributes, acknowledgement mode and exchange kind.
#[derive(Debug, Clone)]
pub struct ConsumerStage {
    connect: Connect,
    queue: QueueSpec,
    consumer: ConsumerSpec,
    kind: ExchangeKind,
    binding_keys: Vec<String>,
}

impl ConsumerStage {
    pub fn queue_max_length(mut self, max: u64) -> Self {
        self.queue.max_length = Some(max);
        self
    }

    pub fn queue_max_length_bytes(mut self, max_bytes: u64) -> Self {
        self.queue.max_length_bytes = Some(max_bytes);
        self
    }

    /// Message TTL in milliseconds.
    pub fn queue_msg_ttl(mut self, ttl: u64) -> Self {
        self.queue.message_ttl = Some(ttl);
        self
    }

    /// Defaults to true: the broker treats deliveries as acknowledged on send
    /// and the delivery loop never acks or nacks.
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.consumer.auto_ack = auto_ack;
        self
    }

    /// Queue durability, independent of the exchange durability.
    pub fn durable(mut self, durable: bool) -> Self {
        self.queue.durable = durable;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.queue.exclusive = exclusive;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.queue.auto_delete = auto_delete;
        self
    }

    pub fn from_topic<I, S>(self, binding_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind(ExchangeKind::Topic, binding_keys)
    }

    pub fn directly_from<I, S>(self, binding_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bind(ExchangeKind::Direct, binding_keys)
    }

    /// Binds once with an empty key, discarding keys given earlier.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self.binding_keys = vec![String::new()];
        self
    }

    pub fn from_exchange(self, exchange: &str) -> ConsumerBuilder {
        self.exchange(exchange, false)
    }

    pub fn from_durable_exchange(self, exchange: &str) -> ConsumerBuilder {
        self.exchange(exchange, true)
    }

    fn bind<I, S>(mut self, kind: ExchangeKind, binding_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kind = kind;
        self.binding_keys = binding_keys.into_iter().map(Into::into).collect();
        self
    }

    fn exchange(self, exchange: &str, durable: bool) -> ConsumerBuilder {
        ConsumerBuilder {
            span: self.connect.span,
            topology: ConsumerTopology {
                connection: self.connect.config,
                queue: self.queue,
                exchange: ExchangeSpec::new(exchange, self.kind, durable, self.binding_keys),
                consumer: self.consumer,
            },
        }
    }
}

/// Terminal consumer stage.
#[derive(Debug, Clone)]
pub struct ConsumerBuilder {
    topology: ConsumerTopology,
    span: Span,
}

impl ConsumerBuilder {
    /// The assembled topology, without connecting.
    pub fn topology(&self) -> ConsumerTopology {
        self.topology.clone()
    }

    /// Connects to the broker, declares exchange, queue, consumer and bindings.
    pub async fn build(self) -> Result<QueueConsumer, AmqpError> {
        QueueConsumer::connect(self.topology, self.span).await
    }

    /// Declares the topology on a channel the caller already opened.
    pub async fn build_on(self, channel: Arc<dyn AmqpChannel>) -> Result<QueueConsumer, AmqpError> {
        QueueConsumer::declare(self.topology, channel, self.span).await
    }
}
