//! Storage for canonical entities and the mention ledger.
//!
//! The traits define the contract the engine writes through. `memory` backs
//! tests and throwaway runs; `persistent` is the durable on-disk store.

pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

pub use memory::{InMemoryCanonicalStore, InMemoryMentionLedger};
pub use traits::{CanonicalStore, MentionLedger, StorageError};
