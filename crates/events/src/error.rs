use tally_common::error::TallyError;
use thiserror::Error;

/// What the consumer does with a message after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge; the message is never delivered again.
    Ack,
    /// Leave unacknowledged so the bus redelivers it.
    Retry,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("storage failure: {0}")]
    Storage(String),

    /// A multi-record update stopped half way: `applied` records were
    /// written, `failed` was not.
    #[error("partial update: applied [{}], failed {failed}: {reason}", applied.join(", "))]
    PartialUpdate {
        applied: Vec<String>,
        failed: String,
        reason: String,
    },

    #[error("no handler registered for topic {0}")]
    UnknownTopic(String),

    #[error("message bus error: {0}")]
    Bus(String),
}

impl EventError {
    pub fn disposition(&self) -> Disposition {
        match self {
            EventError::Storage(_) | EventError::Bus(_) => Disposition::Retry,
            // Redelivering a partial update would apply the committed half twice.
            EventError::PartialUpdate { .. } => Disposition::Ack,
            EventError::Decode(_) | EventError::Payload(_) | EventError::UnknownTopic(_) => {
                Disposition::Ack
            }
        }
    }
}

impl From<TallyError> for EventError {
    fn from(err: TallyError) -> Self {
        match err {
            retryable if retryable.is_retryable() => EventError::Storage(retryable.to_string()),
            TallyError::Validation(msg) | TallyError::Internal(msg) => EventError::Payload(msg),
            other => EventError::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for EventError {
    fn from(err: redis::RedisError) -> Self {
        EventError::Bus(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retried() {
        assert_eq!(EventError::Storage("x".into()).disposition(), Disposition::Retry);
        assert_eq!(EventError::Bus("x".into()).disposition(), Disposition::Retry);
        assert_eq!(EventError::Decode("x".into()).disposition(), Disposition::Ack);
        assert_eq!(EventError::Payload("x".into()).disposition(), Disposition::Ack);
        assert_eq!(
            EventError::UnknownTopic("x".into()).disposition(),
            Disposition::Ack
        );
    }

    #[test]
    fn partial_update_lists_applied_records() {
        let err = EventError::PartialUpdate {
            applied: vec!["revenue".into()],
            failed: "order".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(err.disposition(), Disposition::Ack);
        assert_eq!(
            err.to_string(),
            "partial update: applied [revenue], failed order: connection reset"
        );
    }

    #[test]
    fn storage_errors_map_to_retryable_failures() {
        let err: EventError = TallyError::Conflict("moved on".into()).into();
        assert!(matches!(err, EventError::Storage(_)));

        let err: EventError = TallyError::Validation("month 13".into()).into();
        assert!(matches!(err, EventError::Payload(_)));
    }
}
