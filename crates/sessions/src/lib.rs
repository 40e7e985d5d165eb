//! Append-only JSONL session persistence.
//!
//! One session per agent, rooted in a data directory: `current.jsonl`
//! holds the live conversation, compaction rolls it into timestamped
//! archives.

pub mod store;
pub mod tokens;

pub use store::{SessionEntry, SessionStore};
pub use tokens::{HeuristicCounter, TokenCounter};
