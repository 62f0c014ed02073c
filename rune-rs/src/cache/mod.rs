//! Bounded caches backing script-side helpers.
//!
//! Both are owned by the live runtime and touched only from the consumer
//! thread, so neither is synchronised.

pub mod pattern;
pub mod words;

pub use pattern::PatternCache;
pub use words::WordCache;
