use super::backend::BackendError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerErrorKind {
    /// Producer is not in a running state; fatal to the attempt.
    NotRunning,
    /// Backend rejected the message or the transport to it failed.
    SendFailed,
    /// The message could not be converted for the backend.
    SerializationFailed,
    /// Request/reply exceeded the caller timeout.
    Timeout,
}

impl ProducerErrorKind {
    /// Only backend rejections are rescheduled by the dispatch path.
    pub fn is_retryable(self) -> bool {
        matches!(self, ProducerErrorKind::SendFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProducerErrorKind::NotRunning => "not_running",
            ProducerErrorKind::SendFailed => "send_failed",
            ProducerErrorKind::SerializationFailed => "serialization_failed",
            ProducerErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ProducerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type surfaced by the producer facade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: topic={topic}, msgId={message_id}, cause={cause}")]
pub struct ProducerError {
    pub kind: ProducerErrorKind,
    pub topic: String,
    /// Empty when the send never reached the backend.
    pub message_id: String,
    pub cause: String,
}

impl ProducerError {
    pub fn new(
        kind: ProducerErrorKind,
        topic: impl Into<String>,
        message_id: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            topic: topic.into(),
            message_id: message_id.into(),
            cause: cause.into(),
        }
    }

    /// Normalize a backend failure; the backend type does not cross this boundary.
    pub fn from_backend(topic: &str, message_id: &str, err: &BackendError) -> Self {
        let kind = match err {
            BackendError::Timeout(_) => ProducerErrorKind::Timeout,
            BackendError::InvalidMessage(_) => ProducerErrorKind::SerializationFailed,
            BackendError::NotRunning(_) => ProducerErrorKind::NotRunning,
            BackendError::Client(_) | BackendError::Broker { .. } | BackendError::Remoting(_) => {
                ProducerErrorKind::SendFailed
            }
        };
        Self::new(kind, topic, message_id, err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backend_errors_normalize_by_kind() {
        let cases = [
            (
                BackendError::Broker {
                    code: 14,
                    message: "service not available".into(),
                },
                ProducerErrorKind::SendFailed,
            ),
            (
                BackendError::Remoting("connection reset".into()),
                ProducerErrorKind::SendFailed,
            ),
            (
                BackendError::Timeout(Duration::from_millis(300)),
                ProducerErrorKind::Timeout,
            ),
            (
                BackendError::InvalidMessage("body too large".into()),
                ProducerErrorKind::SerializationFailed,
            ),
            (
                BackendError::NotRunning("shutdown".into()),
                ProducerErrorKind::NotRunning,
            ),
        ];
        for (err, kind) in cases {
            let normalized = ProducerError::from_backend("orders", "ID-1", &err);
            assert_eq!(normalized.kind, kind);
            assert_eq!(normalized.topic, "orders");
            assert_eq!(normalized.message_id, "ID-1");
            assert_eq!(normalized.cause, err.to_string());
        }
    }

    #[test]
    fn only_send_failures_retry() {
        assert!(ProducerErrorKind::SendFailed.is_retryable());
        assert!(!ProducerErrorKind::NotRunning.is_retryable());
        assert!(!ProducerErrorKind::SerializationFailed.is_retryable());
        assert!(!ProducerErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = ProducerError::new(ProducerErrorKind::SendFailed, "orders", "", "boom");
        assert_eq!(
            err.to_string(),
            "send_failed: topic=orders, msgId=, cause=boom"
        );
    }
}
