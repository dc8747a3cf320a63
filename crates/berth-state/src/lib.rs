//! berth-state — embedded state store for Berth.
//!
//! Backed by [redb](https://docs.rs/redb), holds sandboxes, releases and the
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns under
//! zero-padded id keys. Log lines use `{execution}:{stream}:{line}` keys so a
//! range scan returns one execution's output in order and a repeated insert
//! cannot create a second row for the same line.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
