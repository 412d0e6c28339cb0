//! Dispatcher - message を envelope に変換して transport へ渡す
//!
//! # 学習ポイント
//! - 検証とオプション解決を transport 呼び出しの前に済ませる
//! - `impl IntoIterator<Item = Arc<dyn Transport>>` による注入

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{
    CourierError, DispatchOptions, DispatchResult, EnvelopeMetadata, Message, MessageEnvelope,
    Priority,
};
use crate::ports::{Clock, IdGenerator, SharedClock, Transport};
use crate::typed::{PayloadCodec, TypedMessage};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_transport: String,
    pub default_queue: String,
    pub default_priority: Priority,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_transport: crate::impls::QUEUE_TRANSPORT.to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            default_priority: Priority::NORMAL,
        }
    }
}

/// Options resolved against configuration, shared by every message of one call.
struct Resolved {
    transport: Arc<dyn Transport>,
    queue: String,
    priority: Priority,
    max_retries: u32,
}

/// Dispatcher は名前で transport を解決して envelope を送る
pub struct Dispatcher {
    transports: HashMap<String, Arc<dyn Transport>>,
    id_generator: Arc<dyn IdGenerator>,
    clock: SharedClock,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Fails when `config.default_transport` is not among `transports`.
    pub fn new(
        transports: impl IntoIterator<Item = Arc<dyn Transport>>,
        id_generator: Arc<dyn IdGenerator>,
        clock: SharedClock,
        config: DispatcherConfig,
    ) -> Result<Self, CourierError> {
        let transports: HashMap<String, Arc<dyn Transport>> = transports
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();

        if !transports.contains_key(&config.default_transport) {
            return Err(CourierError::Configuration(format!(
                "default transport '{}' is not registered",
                config.default_transport
            )));
        }

        Ok(Self {
            transports,
            id_generator,
            clock,
            config,
        })
    }

    pub fn transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    /// Registered transport names, sorted.
    pub fn transport_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transports.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatch one message.
    ///
    /// Validation and option resolution happen before the transport is
    /// touched. With a synchronous transport the handler has already run when
    /// this returns, and its failure is returned as `CourierError::Transport`.
    pub async fn dispatch(
        &self,
        message: Message,
        options: DispatchOptions,
    ) -> Result<DispatchResult, CourierError> {
        message.validate()?;
        let resolved = self.resolve(&options)?;
        let key = options
            .idempotency_key
            .clone()
            .unwrap_or_else(|| self.id_generator.generate_idempotency_key());
        self.send(message, &options, &resolved, key).await
    }

    /// Dispatch several messages with the same options.
    ///
    /// Every message is validated before the first send. Sends then happen in
    /// order and stop at the first transport error; earlier sends are not
    /// undone. A caller-supplied idempotency key is suffixed with the message
    /// index so the messages do not deduplicate each other.
    pub async fn dispatch_batch(
        &self,
        messages: Vec<Message>,
        options: DispatchOptions,
    ) -> Result<Vec<DispatchResult>, CourierError> {
        for message in &messages {
            message.validate()?;
        }
        let resolved = self.resolve(&options)?;

        let mut results = Vec::with_capacity(messages.len());
        for (index, message) in messages.into_iter().enumerate() {
            let key = match &options.idempotency_key {
                Some(key) => format!("{key}-{index}"),
                None => self.id_generator.generate_idempotency_key(),
            };
            results.push(self.send(message, &options, &resolved, key).await?);
        }
        Ok(results)
    }

    /// Encode a typed payload and dispatch it under `T::TYPE`.
    pub async fn dispatch_typed<T: TypedMessage>(
        &self,
        payload: &T,
        options: DispatchOptions,
    ) -> Result<DispatchResult, CourierError> {
        let message = PayloadCodec::encode(payload)
            .map_err(|e| CourierError::MessageValidation(e.to_string()))?;
        self.dispatch(message, options).await
    }

    fn resolve(&self, options: &DispatchOptions) -> Result<Resolved, CourierError> {
        let transport_name = options
            .transport
            .as_deref()
            .unwrap_or(self.config.default_transport.as_str());
        let transport = self.transport(transport_name).ok_or_else(|| {
            CourierError::Configuration(format!("unknown transport '{transport_name}'"))
        })?;

        if let Some(at) = options.scheduled_at {
            if at > self.clock.now() && !transport.supports_delayed_delivery() {
                return Err(CourierError::Configuration(format!(
                    "transport '{transport_name}' cannot hold messages until {at}"
                )));
            }
        }

        let priority = match options.priority {
            Some(value) => Priority::new(value)?,
            None => self.config.default_priority,
        };

        let max_retries = options
            .max_retries
            .unwrap_or_else(|| transport.default_max_retries());

        Ok(Resolved {
            queue: options
                .queue
                .clone()
                .unwrap_or_else(|| self.config.default_queue.clone()),
            transport,
            priority,
            max_retries,
        })
    }

    async fn send(
        &self,
        message: Message,
        options: &DispatchOptions,
        resolved: &Resolved,
        idempotency_key: String,
    ) -> Result<DispatchResult, CourierError> {
        let now = self.clock.now();
        let envelope = MessageEnvelope {
            id: self.id_generator.generate_message_id(),
            message,
            headers: options.headers.clone(),
            transport_name: resolved.transport.name().to_string(),
            queue_name: resolved.queue.clone(),
            priority: resolved.priority,
            available_at: options.scheduled_at.unwrap_or(now),
            created_at: now,
            metadata: EnvelopeMetadata {
                retry_count: 0,
                max_retries: resolved.max_retries,
                idempotency_key: Some(idempotency_key.clone()),
                last_error: None,
            },
        };

        let result = DispatchResult {
            message_id: envelope.id,
            transport: envelope.transport_name.clone(),
            queue: envelope.queue_name.clone(),
            priority: envelope.priority,
            scheduled_at: options.scheduled_at,
            idempotency_key,
        };

        debug!(
            message_id = %envelope.id,
            message_type = %envelope.message_type(),
            transport = %envelope.transport_name,
            queue = %envelope.queue_name,
            "dispatching"
        );
        resolved.transport.send(envelope).await?;
        Ok(result)
    }
}
