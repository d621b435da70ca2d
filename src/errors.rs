// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP DSL
//!
//! Every failure the crate can surface is an `AmqpError`. Each variant names the
//! operation that failed and carries the underlying cause as text, so callers
//! keep one propagation channel while still being able to match on the failure
//! category through [`AmqpError::kind`].

use thiserror::Error;

/// Broad category of an [`AmqpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Building the address, connecting, opening a channel or losing the delivery stream.
    Connection,
    /// Exchange declare, queue declare, consumer registration or binding.
    Declare,
    /// A delivered body could not be read as text.
    Decode,
    /// The ack or nack call itself failed.
    Acknowledge,
    /// Raised by a consumer handler. Recovered locally by the delivery loop.
    Handler,
    /// Publishing or envelope serialization failed.
    Publish,
    /// Releasing the channel or connection failed.
    Close,
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// The connection configuration could not be turned into a broker address
    #[error("invalid connection configuration: {0}")]
    InvalidConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The consumer stream failed or was closed by the broker
    #[error("failure to receive delivery: {0}")]
    DeliveryStreamError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer on queue `{0}`: {1}")]
    BindingConsumerError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}` with key `{key}`: {cause}")]
    BindingExchangeToQueueError {
        exchange: String,
        queue: String,
        key: String,
        cause: String,
    },

    /// The delivered body is not valid UTF-8
    #[error("failure to parse message: {0}")]
    ParsePayloadError(String),

    /// Error acknowledging a message
    #[error("failure to ack delivery `{0}`: {1}")]
    AckMessageError(u64, String),

    /// Error negative-acknowledging a message
    #[error("failure to nack delivery `{0}`: {1}")]
    NackMessageError(u64, String),

    /// Error raised by a consumer handler
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error serializing a message envelope
    #[error("failure to serialize message: {0}")]
    SerializeMessageError(String),

    /// Error closing the channel or connection
    #[error("failure to close connection: {0}")]
    CloseError(String),
}

impl AmqpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::InvalidConfigError(_)
            | AmqpError::ConnectionError(_)
            | AmqpError::ChannelError(_)
            | AmqpError::DeliveryStreamError(_) => ErrorKind::Connection,
            AmqpError::DeclareExchangeError(..)
            | AmqpError::DeclareQueueError(..)
            | AmqpError::BindingConsumerError(..)
            | AmqpError::BindingExchangeToQueueError { .. } => ErrorKind::Declare,
            AmqpError::ParsePayloadError(_) => ErrorKind::Decode,
            AmqpError::AckMessageError(..) | AmqpError::NackMessageError(..) => {
                ErrorKind::Acknowledge
            }
            AmqpError::HandlerError(_) => ErrorKind::Handler,
            AmqpError::PublishingError(_) | AmqpError::SerializeMessageError(_) => {
                ErrorKind::Publish
            }
            AmqpError::CloseError(_) => ErrorKind::Close,
        }
    }
}
