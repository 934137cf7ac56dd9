//! Consumer error types

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

use crate::consumer::state::GroupState;
use crate::error::AlertError;

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Consumer error types
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Kafka client errors
    #[error("Kafka error: {0}")]
    KafkaError(#[from] KafkaError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The consumer could not join or stay in its group
    #[error("Group join error: {0}")]
    GroupJoinError(String),

    /// Alert lookup or trigger commit failed
    #[error("Store error: {0}")]
    StoreError(#[from] AlertError),

    /// Channel errors
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The group state machine refused a transition
    #[error("Invalid group state transition from {from} to {to}")]
    InvalidTransition { from: GroupState, to: GroupState },
}

impl ConsumerError {
    /// Whether the error must terminate the whole pipeline.
    ///
    /// Store failures are scoped to one message; bus connectivity and group
    /// membership failures are not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConsumerError::ConfigError(_)
            | ConsumerError::ConnectionError(_)
            | ConsumerError::GroupJoinError(_)
            | ConsumerError::InvalidTransition { .. } => true,
            ConsumerError::KafkaError(e) => is_fatal_kafka_error(e),
            ConsumerError::StoreError(_) | ConsumerError::ChannelError(_) => false,
        }
    }
}

/// Kafka failures that mean the bus is unreachable or the group unusable.
pub fn is_fatal_kafka_error(error: &KafkaError) -> bool {
    match error {
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => true,
        other => matches!(
            other.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::Fatal
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::SaslAuthenticationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
                    | RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::InvalidGroupId
            )
        ),
    }
}
