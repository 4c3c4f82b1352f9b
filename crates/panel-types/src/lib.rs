//! Common types shared across the panel sync crates
//!
//! This crate holds the vocabulary both the sync library and the CLI speak:
//! proxy protocols, panel kinds and a few serde helpers for the loosely typed
//! JSON that panels emit.

pub mod de;
pub mod error;
pub mod panel;
pub mod protocol;

pub use error::*;
pub use panel::*;
pub use protocol::*;
