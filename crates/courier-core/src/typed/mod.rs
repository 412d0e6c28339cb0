//! Typed - 型付き message API
//!
//! アプリケーションコードから message type 文字列を追い出す。
//! payload 型が `TypedMessage::TYPE` で一度だけ type を名乗り、handler は
//! decode 済みの payload を受け取る。
//!
//! # 2 層構造
//! - **Typed**: `TypedMessage`, `Handler<T>` - アプリが実装するもの
//! - **Erased**: `MessageHandler`（`app::registry`）- registry が保持するもの

pub mod codec;
pub mod handler;
pub mod message;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{Handler, TypedHandler};
pub use self::message::TypedMessage;
