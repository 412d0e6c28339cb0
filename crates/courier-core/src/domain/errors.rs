//! Errors and their operational classification.
//!
//! Every error that leaves the engine carries an [`ErrorKind`]. Handler errors
//! additionally carry an explicit `retryable` flag chosen by the handler
//! author; nothing in the engine infers retryability from the error's type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cron::CronError;
use super::ids::MessageId;

/// Operational classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input. Rejected at dispatch time, never retried.
    Validation,
    /// Programming or configuration mistake (unknown transport, bad priority).
    Configuration,
    /// Business-logic failure raised by a handler.
    Handler,
    /// Failure inside a transport's send/receive path.
    Transport,
}

/// Top-level error of the engine.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("message validation failed: {0}")]
    MessageValidation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::MessageValidation(_) => ErrorKind::Validation,
            CourierError::Configuration(_) | CourierError::InvalidCron(_) => {
                ErrorKind::Configuration
            }
            CourierError::Handler(_) => ErrorKind::Handler,
            CourierError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Only handler failures can ever be retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            CourierError::Handler(e) => e.is_retryable(),
            CourierError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Failure raised by a message handler.
///
/// The handler author decides whether the failure is worth retrying:
/// `HandlerError::retryable("smtp timeout")` vs
/// `HandlerError::permanent("recipient does not exist")`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retryable: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Handler
    }
}

/// Failure within a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A handler run in-line by the sync transport failed.
    #[error("handler failed (retryable={retryable}): {source}")]
    Handler {
        #[source]
        source: HandlerError,
        retryable: bool,
    },

    /// `acknowledge`/`reject` called for an envelope the transport does not
    /// currently consider claimed.
    #[error("envelope {0} is not claimed")]
    NotClaimed(MessageId),

    #[error("transport '{transport}' failed: {message}")]
    Backend { transport: String, message: String },
}

impl TransportError {
    pub fn handler(source: HandlerError) -> Self {
        let retryable = source.is_retryable();
        TransportError::Handler { source, retryable }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Handler { retryable: true, .. })
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}
