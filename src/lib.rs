//! Faub: a differential backup engine.
//!
//! A client walks a source directory tree and streams it over a framed
//! protocol (see [`channel`] and [`protocol`]) to a server that stages the
//! incoming files, deciding per file whether to request a fresh transfer or
//! hardlink from a previous backup's already-stored content. Completed
//! backups are tracked per profile in a chronologically ordered catalog
//! ([`catalog::FaubCache`]), against which a retention policy ([`retention`])
//! decides what survives a prune, a linking pass ([`linking`]) deduplicates
//! identical content across backups, and a tagging store ([`tagging`])
//! layers user-assigned holds and labels on top.
//!
//! Every engine entry point takes an explicit [`env::Environment`] rather
//! than reaching for global state, and every fallible operation returns
//! [`error::FaubError`].

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod catalog;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod fastcache;
pub mod linking;
pub mod lock;
pub mod pipeline;
pub mod protocol;
pub mod retention;
pub mod tagging;
pub mod time_util;
pub mod walker;

pub use env::Environment;
pub use error::{FaubError, Result};
