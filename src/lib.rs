// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Fluent AMQP topology builder with publisher and consumer runtimes.
//!
//! Start with [`builder::QueueBuilder::connect_to`].

mod otel;

pub mod builder;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod topology;
