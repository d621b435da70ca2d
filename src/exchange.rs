// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing entities of the broker. This module defines the
//! exchange kinds the DSL can declare and the immutable `ExchangeSpec` the
//! builder produces for the consumer path.

use std::fmt;

/// Represents the types of exchanges the DSL can declare.
///
/// - Topic: routes on wildcard pattern matching of routing keys
/// - Direct: routes on an exact match of routing keys
/// - Fanout: broadcasts to all bound queues regardless of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Topic,
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

/// Exchange a consumer queue is bound to, with the keys used for binding.
///
/// A fanout exchange always carries exactly one empty binding key: the broker
/// ignores routing keys for fanout but still needs one bind call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) binding_keys: Vec<String>,
}

impl ExchangeSpec {
    pub(crate) fn new(
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        binding_keys: Vec<String>,
    ) -> ExchangeSpec {
        let binding_keys = match kind {
            ExchangeKind::Fanout => vec![String::new()],
            _ => binding_keys,
        };

        ExchangeSpec {
            name: name.to_owned(),
            kind,
            durable,
            binding_keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn binding_keys(&self) -> &[String] {
        &self.binding_keys
    }
}
