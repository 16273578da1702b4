//! Pattern/tag based bulk invalidation.
//!
//! - [`pattern`]: compiled regex/glob key matchers
//! - [`rule`]: invalidation rules, triggers and actions
//! - [`engine`]: rule registry and dispatch (time-driven and on demand)

pub mod engine;
pub mod pattern;
pub mod rule;
