//! Backend-agnostic message envelope and send outcomes.

use super::backend::BackendMessage;
use super::error::{ProducerError, ProducerErrorKind};
use crate::protocol::WireMessage;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const PROPERTY_MESSAGE_DESTINATION: &str = "DESTINATION";
pub const PROPERTY_UNIQ_KEY: &str = "UNIQ_KEY";
pub const PROPERTY_TTL: &str = "TTL";
pub const PROPERTY_BIZ_SEQ: &str = "BIZSEQNO";

/// Property keys routed to system properties when converting from other representations.
const SYSTEM_KEYS: [&str; 4] = [
    PROPERTY_MESSAGE_DESTINATION,
    PROPERTY_UNIQ_KEY,
    PROPERTY_TTL,
    PROPERTY_BIZ_SEQ,
];

/// Characters the backend reserves for its property encoding.
const RESERVED_PROPERTY_CHARS: [char; 2] = ['\u{1}', '\u{2}'];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    topic: String,
    msg_id: String,
    system_properties: BTreeMap<String, String>,
    user_properties: BTreeMap<String, String>,
    body: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let topic = topic.into();
        let mut system_properties = BTreeMap::new();
        system_properties.insert(PROPERTY_MESSAGE_DESTINATION.to_string(), topic.clone());
        Self {
            topic,
            msg_id: String::new(),
            system_properties,
            user_properties: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Id assigned by the producer facade; empty until a send was attempted.
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn set_msg_id(&mut self, msg_id: impl Into<String>) {
        self.msg_id = msg_id.into();
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties.get(key).map(String::as_str)
    }

    pub fn put_system_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.system_properties.insert(key.into(), value.into());
    }

    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_properties.get(key).map(String::as_str)
    }

    pub fn put_user_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user_properties.insert(key.into(), value.into());
    }

    pub fn biz_seq(&self) -> Option<&str> {
        self.system_property(PROPERTY_BIZ_SEQ)
    }

    /// Time-to-live in milliseconds, read from the TTL system property or a `ttl` user property.
    pub fn ttl(&self) -> Option<Duration> {
        self.system_property(PROPERTY_TTL)
            .or_else(|| self.user_property("ttl"))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn from_wire(wire: &WireMessage) -> Self {
        let mut msg = Message::new(wire.topic.clone(), Bytes::from(wire.body.clone()));
        for (key, value) in &wire.properties {
            if SYSTEM_KEYS.contains(&key.as_str()) {
                if key != PROPERTY_MESSAGE_DESTINATION {
                    msg.put_system_property(key.clone(), value.clone());
                }
            } else {
                msg.put_user_property(key.clone(), value.clone());
            }
        }
        if let Some(uniq) = msg.system_property(PROPERTY_UNIQ_KEY) {
            msg.msg_id = uniq.to_string();
        }
        msg
    }

    pub fn to_wire(&self) -> WireMessage {
        let mut properties = self.user_properties.clone();
        for (key, value) in &self.system_properties {
            properties.insert(key.clone(), value.clone());
        }
        WireMessage {
            topic: self.topic.clone(),
            properties,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }

    /// Convert into the backend representation, validating what the backend cannot encode.
    pub(crate) fn to_backend(&self) -> Result<BackendMessage, ProducerError> {
        if self.topic.trim().is_empty() {
            return Err(self.conversion_error("topic is blank"));
        }
        let mut properties = BTreeMap::new();
        for (key, value) in self.user_properties.iter().chain(&self.system_properties) {
            if key.is_empty() {
                return Err(self.conversion_error("empty property key"));
            }
            if key.contains(RESERVED_PROPERTY_CHARS) || value.contains(RESERVED_PROPERTY_CHARS) {
                return Err(self.conversion_error(&format!(
                    "property {key:?} contains a reserved separator"
                )));
            }
            properties.insert(key.clone(), value.clone());
        }
        Ok(BackendMessage {
            topic: self.topic.clone(),
            properties,
            body: self.body.clone(),
        })
    }

    pub(crate) fn from_backend(backend: BackendMessage) -> Self {
        let mut msg = Message::new(backend.topic, backend.body);
        for (key, value) in backend.properties {
            if SYSTEM_KEYS.contains(&key.as_str()) {
                if key != PROPERTY_MESSAGE_DESTINATION {
                    msg.system_properties.insert(key, value);
                }
            } else {
                msg.user_properties.insert(key, value);
            }
        }
        if let Some(uniq) = msg.system_property(PROPERTY_UNIQ_KEY) {
            msg.msg_id = uniq.to_string();
        }
        msg
    }

    fn conversion_error(&self, cause: &str) -> ProducerError {
        ProducerError::new(
            ProducerErrorKind::SerializationFailed,
            self.topic.clone(),
            self.msg_id.clone(),
            cause,
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message{{topic={},msgId={},bizSeq={},bodyLen={}}}",
            self.topic,
            self.msg_id,
            self.biz_seq().unwrap_or(""),
            self.body.len()
        )
    }
}

/// Outcome of one accepted send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub topic: String,
    pub message_id: String,
}

/// Outcome of one failed send attempt.
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    pub topic: String,
    pub message_id: String,
    pub error: ProducerError,
}

impl ExceptionContext {
    pub fn new(error: ProducerError) -> Self {
        Self {
            topic: error.topic.clone(),
            message_id: error.message_id.clone(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_mirrors_topic() {
        let msg = Message::new("orders", "x");
        assert_eq!(msg.system_property(PROPERTY_MESSAGE_DESTINATION), Some("orders"));
        assert!(msg.msg_id().is_empty());
    }

    #[test]
    fn wire_conversion_routes_system_keys() {
        let wire = WireMessage::new("orders", "body")
            .with_property(PROPERTY_BIZ_SEQ, "biz-1")
            .with_property(PROPERTY_TTL, "1500")
            .with_property("region", "eu");
        let msg = Message::from_wire(&wire);
        assert_eq!(msg.biz_seq(), Some("biz-1"));
        assert_eq!(msg.ttl(), Some(Duration::from_millis(1500)));
        assert_eq!(msg.user_property("region"), Some("eu"));
        assert_eq!(msg.user_property(PROPERTY_BIZ_SEQ), None);

        let back = msg.to_wire();
        assert_eq!(
            back.properties
                .get(PROPERTY_MESSAGE_DESTINATION)
                .map(String::as_str),
            Some("orders")
        );
        assert_eq!(back.body, "body");
        assert_eq!(Message::from_wire(&back), msg);
    }

    #[test]
    fn backend_conversion_rejects_blank_topic_and_reserved_chars() {
        let err = Message::new("  ", "x").to_backend().unwrap_err();
        assert_eq!(err.kind, ProducerErrorKind::SerializationFailed);

        let mut msg = Message::new("orders", "x");
        msg.put_user_property("bad", "a\u{1}b");
        let err = msg.to_backend().unwrap_err();
        assert_eq!(err.kind, ProducerErrorKind::SerializationFailed);
        assert_eq!(err.topic, "orders");
    }

    #[test]
    fn backend_round_trip_recovers_uniq_id() {
        let mut msg = Message::new("orders", "x");
        msg.put_system_property(PROPERTY_UNIQ_KEY, "ID-1");
        msg.put_user_property("k", "v");
        let back = Message::from_backend(msg.to_backend().unwrap());
        assert_eq!(back.msg_id(), "ID-1");
        assert_eq!(back.user_property("k"), Some("v"));
    }
}
