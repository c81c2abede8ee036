//! Activity logging: JSONL writer plus the thread that owns it.

pub mod activity;
pub mod jsonl;
