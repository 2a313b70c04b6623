//! Small crate-wide convenience macros.

/// Log to the browser console at `debug` level, tagged with the crate name.
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        web_sys::console::debug_1(&format!("[pubsub-mfe] {}", format!($($arg)*)).into())
    };
}

/// Log to the browser console at `warn` level.
#[macro_export]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        web_sys::console::warn_1(&format!("[pubsub-mfe] {}", format!($($arg)*)).into())
    };
}

/// Log to the browser console at `error` level.
#[macro_export]
macro_rules! error_log {
    ($($arg:tt)*) => {
        web_sys::console::error_1(&format!("[pubsub-mfe] {}", format!($($arg)*)).into())
    };
}
