//! `rolodex-core`: record model building blocks.
//!
//! This crate contains **pure** types (no I/O, no async): identifiers, the
//! record schema with its sync tag, and the in-memory record list.

pub mod error;
pub mod id;
pub mod list;
pub mod record;

pub use error::{DomainError, DomainResult};
pub use id::RecordId;
pub use list::RecordList;
pub use record::{Record, SyncStatus};
