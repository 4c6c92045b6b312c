#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

//! `bitcask` is an embeddable, persistent key-value store organized as an
//! append-only log with an in-memory index (the "keydir"). It targets
//! workloads where writes must be durable and sequential, reads must be
//! served by at most one random disk access, and the hot keyset fits in
//! memory.
//!
//! The three pieces, leaves first:
//!
//! - [`entry`]: encodes/decodes a single log record.
//! - [`keydir`]: the concurrent, sharded in-memory key index.
//! - [`engine`]: ties the log files and keydir together behind
//!   [`Engine`](engine::Engine)'s open/get/put/delete/sync/close surface.
//!
//! A network front-end, argument parsing, and process bootstrap are
//! collaborators, not part of this crate; see `src/bin/bitcaskd.rs` for a
//! minimal example built on top of [`Engine`].

pub mod engine;
pub mod entry;
pub mod error;
pub mod keydir;
pub mod options;

pub use engine::Engine;
pub use error::{Error, Result};
pub use options::Options;
