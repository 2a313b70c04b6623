//! Adapters layered on top of the local bus: cross-tab sync, iframe
//! bridging, and persistent history.

pub mod cross_tab;
pub mod history;
pub mod iframe;
pub mod indexed_db_store;
