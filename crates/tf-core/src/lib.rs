//! # tf-core
//!
//! Shared error taxonomy, collaborator traits and result types for the
//! TauFW event-loop tools.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::ScalarLookup;
pub use types::DrawSummary;

/// Crate version, shared by the CLI `version` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
