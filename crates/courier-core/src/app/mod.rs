//! App - ports の上に組み立てたエンジン本体
//!
//! # コンポーネント
//! - **HandlerRegistry** / **HandlerExecutor**: message type → handler と、その実行
//! - **Dispatcher**: message → envelope → transport
//! - **Worker**: ポーリングループ（receive → execute → acknowledge / reject）
//! - **Scheduler** / **SchedulerLoop**: once / interval / cron の dispatch
//! - **CourierBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod dispatcher;
pub mod executor;
pub mod registry;
pub mod scheduler;
pub mod scheduler_loop;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, Courier, CourierBuilder};
pub use self::dispatcher::{DEFAULT_QUEUE, Dispatcher, DispatcherConfig};
pub use self::executor::{ExecutionResult, ExecutorConfig, HandlerExecutor};
pub use self::registry::{HandlerContext, HandlerRegistry, MessageHandler, RegistryError};
pub use self::scheduler::Scheduler;
pub use self::scheduler_loop::SchedulerLoop;
pub use self::status::{WorkerHealth, WorkerStats};
pub use self::worker_loop::{Worker, WorkerConfig};
