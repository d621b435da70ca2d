// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! `QueueSpec` describes the queue a consumer reads from: its flags and the
//! optional length and TTL limits. Limits that were never set are left out of
//! the declare arguments entirely.

use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongLongInt, ShortString},
};

/// Constant for the argument used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the argument used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the argument used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a queue with its flags and optional limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSpec {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) max_length: Option<u64>,
    pub(crate) max_length_bytes: Option<u64>,
    pub(crate) message_ttl: Option<u64>,
}

impl QueueSpec {
    /// Creates a non-durable, non-exclusive, non-auto-delete queue without limits.
    pub fn new(name: &str) -> QueueSpec {
        QueueSpec {
            name: name.to_owned(),
            ..QueueSpec::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn max_length(&self) -> Option<u64> {
        self.max_length
    }

    pub fn max_length_bytes(&self) -> Option<u64> {
        self.max_length_bytes
    }

    /// Message TTL in milliseconds.
    pub fn message_ttl(&self) -> Option<u64> {
        self.message_ttl
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: false,
        }
    }

    /// Argument table sent with the queue declare, holding only the limits that were set.
    pub fn arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();

        let limits = [
            (AMQP_HEADERS_MAX_LENGTH, self.max_length),
            (AMQP_HEADERS_MAX_LENGTH_BYTES, self.max_length_bytes),
            (AMQP_HEADERS_MESSAGE_TTL, self.message_ttl),
        ];

        for (key, value) in limits {
            if let Some(value) = value {
                args.insert(ShortString::from(key), long_long(value));
            }
        }

        args
    }
}

// AMQP has no unsigned 64-bit field type; values past i64::MAX saturate.
fn long_long(value: u64) -> AMQPValue {
    AMQPValue::LongLongInt(LongLongInt::try_from(value).unwrap_or(LongLongInt::MAX))
}
