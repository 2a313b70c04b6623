//! Wall-clock helper. Grounded on the teacher's `utils::now_ms`, which
//! reaches for `js_sys::Date::now()` rather than `chrono` to avoid pulling a
//! heavier dependency into the wasm binary for a single timestamp read.

/// Current time in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}
