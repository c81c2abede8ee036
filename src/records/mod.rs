//! Record input: the decoded evidence documents fed to the engine each iteration.

pub mod record;
pub mod source;
