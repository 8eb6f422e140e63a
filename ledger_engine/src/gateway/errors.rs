use std::time::Duration;

use thiserror::Error;

use crate::db_types::{GatewayKind, GatewayRef};

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The {0} gateway did not answer within {1:?}")]
    Timeout(GatewayKind, Duration),
    #[error("Could not reach the gateway: {0}")]
    Transport(String),
    #[error("The gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Could not make sense of the gateway payload: {0}")]
    InvalidPayload(String),
    #[error("The {0} callback signature is invalid")]
    InvalidSignature(GatewayKind),
    #[error("The {0} gateway does not support this operation")]
    Unsupported(GatewayKind),
    #[error("The gateway has not confirmed a final outcome for {0} yet")]
    Unconfirmed(GatewayRef),
    #[error("Gateway configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::InvalidPayload(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}
