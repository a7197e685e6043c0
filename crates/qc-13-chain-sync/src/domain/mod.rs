//! # Domain Module
//!
//! Core domain types for Chain Sync.

pub mod checkpoint;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod value_objects;

pub use checkpoint::*;
pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use value_objects::*;
