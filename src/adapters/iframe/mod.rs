//! Iframe bridging: a 3-way handshake establishes a dedicated `MessagePort`
//! between a host page and an embedded iframe, after which messages travel
//! over that port rather than `postMessage` on `window` directly (spec §6).

pub mod client;
pub mod host;
pub mod protocol;
