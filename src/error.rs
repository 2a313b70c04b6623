//! Crate-wide error type.
//!
//! Internal code returns `Result<T, PubsubError>`. At the `#[wasm_bindgen]`
//! boundary we convert to `JsValue` (via `From`) so JS call sites get a
//! plain error, matching the convention the rest of the wasm-bindgen
//! ecosystem (and this crate's lower layers) already use.

use wasm_bindgen::JsValue;

/// The seven error kinds a publish/subscribe bus for micro-frontends can
/// surface. Kinds, not type names: each variant groups several concrete
/// failure sites that callers handle the same way.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PubsubError {
    /// Bad topic, bad pattern, bad envelope shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Schema mismatch under `strict` enforcement.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Handler ceiling exceeded, storage quota exhausted.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Origin blocked, rate-limited, oversized, untrusted handshake.
    #[error("security gate rejected message: {0}")]
    Security(String),

    /// Transport unavailable, send failed, deserialize failed, handshake
    /// timeout, reconnect attempts exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// Use after detach/dispose, double-attach.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Anything that does not fit the above, e.g. a `serde_json` failure
    /// whose cause doesn't matter to the caller.
    #[error("{0}")]
    Other(String),
}

impl PubsubError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }
}

impl From<PubsubError> for JsValue {
    fn from(err: PubsubError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

impl From<serde_json::Error> for PubsubError {
    fn from(err: serde_json::Error) -> Self {
        PubsubError::Other(format!("serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, PubsubError>;
