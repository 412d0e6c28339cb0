//! Handler trait - 型付き payload を受け取る Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (MessageHandler)
//! - Type erasure パターン (TypedHandler<T, H> → MessageHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::message::TypedMessage;
use crate::app::registry::{HandlerContext, MessageHandler};
use crate::domain::{HandlerError, Message, MessageEnvelope};

/// Handler は型付き payload を処理する
///
/// # 使用例
/// ```ignore
/// struct WelcomeEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for WelcomeEmailHandler {
///     async fn handle(&self, payload: SendEmail, _ctx: &HandlerContext<'_>) -> Result<(), HandlerError> {
///         mailer.send(&payload.to, &payload.template).await
///             .map_err(|e| HandlerError::retryable(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: TypedMessage>: Send + Sync {
    async fn handle(&self, payload: T, context: &HandlerContext<'_>) -> Result<(), HandlerError>;
}

/// TypedHandler は Handler<T> を MessageHandler に変換するアダプタ
///
/// # 型消去の流れ
/// 1. `Message` を `PayloadCodec::decode::<T>` で T に変換
/// 2. `Handler<T>::handle` を呼ぶ
pub struct TypedHandler<T: TypedMessage, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedMessage, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedMessage, H: Handler<T>> MessageHandler for TypedHandler<T, H> {
    async fn handle(
        &self,
        message: &Message,
        _envelope: &MessageEnvelope,
        context: &HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let payload = PayloadCodec::decode::<T>(message)?;
        self.handler.handle(payload, context).await
    }
}
