//! Database module for SQLite queue persistence.

mod pool;
mod queue;

pub use pool::*;
pub use queue::*;
