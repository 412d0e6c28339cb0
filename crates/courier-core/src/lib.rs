//! courier-core
//!
//! Transport-agnostic message dispatch, delivery, retry and scheduling.
//!
//! # Modules
//! - **domain**: data model (ids, message, envelope, errors, retry decisions, schedules, cron)
//! - **ports**: seams (Transport, Clock, IdGenerator, RetryStrategy)
//! - **impls**: in-process implementations (sync/queue transports, exponential backoff)
//! - **app**: registry, executor, dispatcher, worker, scheduler, builder
//! - **typed**: typed message API (TypedMessage, Handler<T>, PayloadCodec)
//! - **config**: TOML configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{
    BuildError, Courier, CourierBuilder, Dispatcher, HandlerContext, HandlerExecutor,
    HandlerRegistry, MessageHandler, Scheduler, Worker, WorkerConfig,
};
pub use crate::config::{ConfigError, CourierConfig};
pub use crate::domain::{
    CourierError, DispatchOptions, DispatchResult, ErrorKind, HandlerError, Message,
    MessageEnvelope, Priority, ScheduleConfig,
};
