//! boardsync - GitHub Projects board sync library
//!
//! This library provides the core functionality for the boardsync CLI,
//! which keeps a remote project board and a directory of markdown task
//! files in step.
//!
//! # Core Concepts
//!
//! - **Tasks**: One markdown file per board item, with YAML frontmatter
//! - **Sync records**: Remote ids and `last_synced`, stored in the task file
//! - **Conflicts**: Both sides changed since `last_synced`; resolved by the
//!   `push_changes` flag, never by content
//! - **Remote stores**: GitHub over GraphQL, or an in-memory store for tests
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.boardsync.toml`
//! - `error`: Error types and result aliases
//! - `task`: Task file format (frontmatter encode/decode)
//! - `local`: Task files on disk
//! - `order`: Column ordering
//! - `index`: Tracked remote ids, for detecting deletions
//! - `labels`: Label classification and diffing
//! - `conflict`: Conflict detection and resolution
//! - `detect`: Change classification for one pass
//! - `remote`: Remote store trait, filters and item iteration
//! - `github`: GitHub Projects store
//! - `memory`: In-memory store
//! - `sync`: Pull and push orchestration
//! - `storage`: File storage and directory management
//! - `lock`: File locking and atomic operations for concurrency safety

pub mod cli;
pub mod config;
pub mod conflict;
pub mod detect;
pub mod error;
pub mod github;
pub mod index;
pub mod labels;
pub mod local;
pub mod lock;
pub mod memory;
pub mod order;
pub mod output;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod task;

pub use error::{Error, Result};
