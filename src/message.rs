// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! A small JSON envelope for messages exchanged through the DSL: a type tag, a
//! correlation id, an optional JSON payload and a free-form attribute bag.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    msg_type: String,
    correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default)]
    data: HashMap<String, Value>,
}

impl Message {
    /// Creates a message with a random correlation id.
    pub fn new(msg_type: &str) -> Message {
        Message::with_correlation_id(msg_type, &Uuid::new_v4().to_string())
    }

    pub fn with_correlation_id(msg_type: &str, correlation_id: &str) -> Message {
        Message {
            msg_type: msg_type.to_owned(),
            correlation_id: correlation_id.to_owned(),
            payload: None,
            data: HashMap::default(),
        }
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Sets the payload, expected to be JSON text.
    pub fn set_payload(&mut self, json: &str) {
        self.payload = Some(json.to_owned());
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn put_data<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.data.insert(key.to_owned(), value.into());
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn all_data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn clear_data(&mut self) {
        self.data.clear();
    }

    pub fn to_json(&self) -> Result<String, AmqpError> {
        serde_json::to_string(self).map_err(|err| AmqpError::SerializeMessageError(err.to_string()))
    }

    /// Parses an envelope previously produced by [`Message::to_json`].
    pub fn from_json(json: &str) -> Result<Message, AmqpError> {
        serde_json::from_str(json).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_generate_distinct_correlation_ids() {
        let first = Message::new("order.created");
        let second = Message::new("order.created");

        assert_ne!(first.correlation_id(), second.correlation_id());
        assert!(Uuid::parse_str(first.correlation_id()).is_ok());
    }

    #[test]
    fn should_serialize_with_type_field() {
        let mut msg = Message::with_correlation_id("order.created", "c-1");
        msg.set_payload(r#"{"id":7}"#);
        msg.put_data("attempt", 2);

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "order.created",
                "correlationId": "c-1",
                "payload": "{\"id\":7}",
                "data": { "attempt": 2 }
            })
        );
    }

    #[test]
    fn should_parse_envelope_without_optional_fields() {
        let msg = Message::from_json(r#"{"type":"ping","correlationId":"c-2"}"#).unwrap();

        assert_eq!(msg.msg_type(), "ping");
        assert_eq!(msg.payload(), None);
        assert!(msg.all_data().is_empty());
    }

    #[test]
    fn should_clear_attribute_bag() {
        let mut msg = Message::new("ping");
        msg.put_data("source", "billing");
        assert_eq!(msg.data("source"), Some(&json!("billing")));

        msg.clear_data();
        assert_eq!(msg.data("source"), None);
    }

    #[test]
    fn should_fail_on_malformed_json() {
        let err = Message::from_json("{not json").unwrap_err();

        assert_eq!(err.kind(), crate::errors::ErrorKind::Decode);
    }
}
