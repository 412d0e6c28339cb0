//! HandlerRegistry - message type → handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（構築後は読み取り専用）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{HandlerError, Message, MessageEnvelope};
use crate::typed::{Handler, TypedHandler, TypedMessage};

/// HandlerContext は実行中の配送の情報を handler に渡す
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub envelope: &'a MessageEnvelope,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl<'a> HandlerContext<'a> {
    pub fn new(envelope: &'a MessageEnvelope) -> Self {
        Self {
            envelope,
            retry_count: envelope.retry_count(),
            max_retries: envelope.max_retries(),
        }
    }

    /// No retry will follow if this attempt fails.
    pub fn is_final_attempt(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// MessageHandler は 1 つの message type を処理する（型消去済み）
///
/// 失敗は `HandlerError` で返す。`retryable` は handler の作者が明示的に選ぶ。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: &Message,
        envelope: &MessageEnvelope,
        context: &HandlerContext<'_>,
    ) -> Result<(), HandlerError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler for message type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("message type must not be empty")]
    EmptyMessageType,
}

/// HandlerRegistry は message type → handler を保持
///
/// # 設計
/// - 初期化中に構築（mutable）し、`Arc<HandlerRegistry>` で共有（読み取り専用）
/// - 実行時のロックは不要
/// - 1 type につき 1 handler。2 つ目の登録はエラー（黙って置き換えない）
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistryError> {
        let message_type = message_type.into();
        if message_type.trim().is_empty() {
            return Err(RegistryError::EmptyMessageType);
        }
        if self.handlers.contains_key(&message_type) {
            return Err(RegistryError::AlreadyRegistered(message_type));
        }
        self.handlers.insert(message_type, handler);
        Ok(())
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: TypedMessage, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register(T::TYPE, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&mut self, message_type: &str) -> bool {
        self.handlers.remove(message_type).is_some()
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    /// Registered message types, sorted.
    pub fn handlers(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
