//! # Property Model
//!
//! The values that cross every boundary: backend ↔ façade ↔ bindings.
//!
//! Design rule: pure data. No I/O, no locks, no async in this module.

pub mod relation;
pub mod entry;
pub mod hashing;

pub use relation::{ObjectId, RelationIdentity};
pub use entry::PropertyEntry;
