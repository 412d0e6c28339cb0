//! TypedMessage trait - message type 文字列と payload 型の対応付け
//!
//! # Trait Bounds
//! - `Serialize`: dispatch 時に `Message::payload` へ encode
//! - `DeserializeOwned`: handler 実行前に decode
//! - `Send + Sync + 'static`: `Arc` 内の handler から扱うため

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A payload type with a fixed message type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
///     template: String,
/// }
///
/// impl TypedMessage for SendEmail {
///     const TYPE: &'static str = "email.send.v1";
/// }
/// ```
pub trait TypedMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Naming convention: `{domain}.{action}.v{major}`.
    const TYPE: &'static str;
}
