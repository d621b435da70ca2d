// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Publisher
//!
//! `QueuePublisher` owns one connection and one channel, declares its exchange
//! once at construction and publishes text messages to it. The current
//! OpenTelemetry context is propagated in the message headers.
//!
//! Publishing goes through `&self` without internal locking: callers sharing a
//! publisher across tasks serialize their calls themselves.

use crate::{
    channel::{AmqpChannel, LapinChannel, ScopedChannel},
    errors::AmqpError,
    message::{Message, JSON_CONTENT_TYPE},
    otel,
    topology::{install_publisher, PublisherTopology},
};
use lapin::{types::ShortString, BasicProperties};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, Instrument, Span};

/// Publisher runtime bound to a declared exchange.
pub struct QueuePublisher {
    channel: ScopedChannel,
    topology: PublisherTopology,
    properties: BasicProperties,
    span: Span,
}

impl QueuePublisher {
    /// Connects to the broker described by the topology and declares the exchange.
    pub async fn connect(
        topology: PublisherTopology,
        span: Span,
    ) -> Result<QueuePublisher, AmqpError> {
        let channel = LapinChannel::open(&topology.connection)
            .instrument(span.clone())
            .await?;

        QueuePublisher::declare(topology, Arc::new(channel), span).await
    }

    /// Declares the exchange on an already open channel.
    pub async fn declare(
        topology: PublisherTopology,
        channel: Arc<dyn AmqpChannel>,
        span: Span,
    ) -> Result<QueuePublisher, AmqpError> {
        let channel = ScopedChannel::new(channel, span.clone());

        install_publisher(channel.get(), &topology)
            .instrument(span.clone())
            .await?;

        Ok(QueuePublisher {
            channel,
            properties: topology.connection.message_properties(),
            topology,
            span,
        })
    }

    pub fn topology(&self) -> &PublisherTopology {
        &self.topology
    }

    /// Publishes `message` as UTF-8 to the configured exchange and routing key.
    pub async fn publish(&self, message: &str) -> Result<(), AmqpError> {
        let routing_key = &self.topology.publisher.routing_key;
        self.send(routing_key, message.as_bytes(), self.properties.clone())
            .await
    }

    /// Publishes `message` to the configured exchange with another routing key.
    pub async fn publish_to(&self, routing_key: &str, message: &str) -> Result<(), AmqpError> {
        self.send(routing_key, message.as_bytes(), self.properties.clone())
            .await
    }

    /// Publishes the JSON form of an envelope.
    ///
    /// The configured properties are extended with the JSON content type, the
    /// envelope type and its correlation id.
    pub async fn publish_message(&self, message: &Message) -> Result<(), AmqpError> {
        let body = message.to_json()?;
        let properties = self
            .properties
            .clone()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_type(ShortString::from(message.msg_type()))
            .with_correlation_id(ShortString::from(message.correlation_id()));

        let routing_key = &self.topology.publisher.routing_key;
        self.send(routing_key, body.as_bytes(), properties).await
    }

    /// Closes the channel, then the connection.
    ///
    /// Closing twice returns a close-kind error.
    pub async fn close(&mut self) -> Result<(), AmqpError> {
        self.channel.close().await
    }

    async fn send(
        &self,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let exchange = &self.topology.publisher.exchange_name;
        let properties = otel::inject_context(&Context::current(), properties);

        self.channel
            .get()
            .basic_publish(exchange, routing_key, payload, properties)
            .instrument(self.span.clone())
            .await?;

        debug!(
            parent: &self.span,
            exchange = exchange.as_str(),
            routing_key,
            "message published"
        );

        Ok(())
    }
}
