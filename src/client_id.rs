//! Per-tab client identifier.
//!
//! Generated once per tab from a cryptographic UUID when `crypto` is
//! available, falling back to a timestamp+entropy form otherwise. Persisted
//! in session storage so reloads of one tab keep the same id while other
//! tabs of the same origin get their own. Grounded on the teacher's
//! `storage.rs`, which reaches for `window().local_storage()` the same way;
//! we target `session_storage()` instead per spec §3.

use crate::error::{PubsubError, Result};
use crate::{debug_log, warn_log};
use wasm_bindgen::JsValue;

pub const SESSION_STORAGE_KEY: &str = "__pubsub_mfe_client_id__";

/// Returns the current tab's client id, generating and persisting one on
/// first use.
pub fn get_or_create_client_id() -> Result<String> {
    let window = web_sys::window().ok_or_else(|| PubsubError::transport("no global window"))?;
    let storage = window
        .session_storage()
        .map_err(|_| PubsubError::transport("session storage unavailable"))?
        .ok_or_else(|| PubsubError::transport("session storage unavailable"))?;

    if let Ok(Some(existing)) = storage.get_item(SESSION_STORAGE_KEY) {
        if is_valid_client_id(&existing) {
            return Ok(existing);
        }
        warn_log!("stored client id '{}' failed validation, regenerating", existing);
    }

    let fresh = generate_client_id();
    if storage.set_item(SESSION_STORAGE_KEY, &fresh).is_err() {
        warn_log!("failed to persist client id to session storage");
    }
    debug_log!("generated client id {}", fresh);
    Ok(fresh)
}

/// Generate a fresh id: a cryptographic UUID v4 when available, otherwise
/// the `cid-{base36}-{base36}` fallback form.
pub fn generate_client_id() -> String {
    try_crypto_uuid().unwrap_or_else(fallback_client_id)
}

fn try_crypto_uuid() -> Option<String> {
    let window = web_sys::window()?;
    let crypto = window.crypto().ok()?;
    // `Crypto::random_uuid` maps to `crypto.randomUUID()`.
    let uuid = crypto.random_uuid();
    if uuid.is_empty() {
        None
    } else {
        Some(uuid)
    }
}

fn fallback_client_id() -> String {
    let ts = js_sys::Date::now() as u64;
    let entropy = (js_sys::Math::random() * 36f64.powi(8)) as u64;
    format!("cid-{}-{}", to_base36(ts), to_base36(entropy))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

/// Validates either UUID-v4 format or the `cid-{base36}-{base36}` fallback.
pub fn is_valid_client_id(id: &str) -> bool {
    is_uuid_v4(id) || is_fallback_form(id)
}

fn is_uuid_v4(id: &str) -> bool {
    uuid::Uuid::parse_str(id)
        .map(|u| u.get_version_num() == 4)
        .unwrap_or(false)
}

fn is_fallback_form(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("cid-") else {
        return false;
    };
    let mut parts = rest.splitn(2, '-');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.chars().all(|c| c.is_ascii_alphanumeric())
                && b.chars().all(|c| c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

#[allow(dead_code)]
pub(crate) fn js_err(msg: &str) -> JsValue {
    JsValue::from_str(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_ids_validate() {
        let id = fallback_client_id();
        assert!(id.starts_with("cid-"));
        assert!(is_valid_client_id(&id));
    }

    #[test]
    fn uuid_v4_validates() {
        let id = "e86b0e1d-7b5e-4c3a-9f0a-3b1c2d4e5f60";
        assert!(is_valid_client_id(id));
    }

    #[test]
    fn garbage_does_not_validate() {
        assert!(!is_valid_client_id("not-an-id"));
        assert!(!is_valid_client_id("cid--"));
        assert!(!is_valid_client_id(""));
    }
}
