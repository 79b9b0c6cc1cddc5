use common::PublishError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("{0}")]
    Internal(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Internal(e.to_string())
    }
}

impl From<MqError> for PublishError {
    fn from(e: MqError) -> Self {
        PublishError::Transport(e.to_string())
    }
}
