//! PayloadCodec - 型付き payload と `Message` の相互変換
//!
//! # 学習ポイント
//! - serde_json::Value を経由した encode / decode
//! - thiserror の `#[source]` でエラー原因を保持
//! - `From<CodecError> for HandlerError`（decode 失敗は retry しても直らない）

use thiserror::Error;

use super::message::TypedMessage;
use crate::domain::{HandlerError, Message};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {message_type}: {source}")]
    Encode {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {message_type}: {source}")]
    Decode {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected message type {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
}

impl From<CodecError> for HandlerError {
    /// A payload that cannot be decoded will not decode on retry either.
    fn from(err: CodecError) -> Self {
        HandlerError::permanent(err.to_string())
    }
}

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: TypedMessage>(payload: &T) -> Result<Message, CodecError> {
        let value = serde_json::to_value(payload).map_err(|source| CodecError::Encode {
            message_type: T::TYPE,
            source,
        })?;
        Ok(Message::new(T::TYPE, value))
    }

    pub fn decode<T: TypedMessage>(message: &Message) -> Result<T, CodecError> {
        if message.message_type() != T::TYPE {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE,
                actual: message.message_type().to_string(),
            });
        }
        serde_json::from_value(message.payload().clone()).map_err(|source| CodecError::Decode {
            message_type: T::TYPE,
            source,
        })
    }
}
