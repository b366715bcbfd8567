//! Foundation types for Strata.
//!
//! Strata is a partition-sharded object store layer: many concurrent request
//! scopes read and mutate shared entities without locking, and every write is
//! reconciled by a structural merge instead of being rejected. This crate
//! provides the types every other Strata crate depends on.
//!
//! # Key Types
//!
//! - [`Value`]: tagged tree representation of any storable shape
//! - [`Scalar`]: totally ordered atomic leaf
//! - [`Shape`]: the structural kind of a present value
//! - [`EntityId`]: UUID v7 entity identity
//! - [`PartitionKey`]: the log partition an entity's writes belong to
//! - [`Entity`]: boundary trait mapping domain types to and from `Value`

pub mod entity;
pub mod error;
pub mod id;
pub mod value;

pub use entity::{Entity, unexpected};
pub use error::TypeError;
pub use id::{EntityId, PartitionKey};
pub use value::{Scalar, Shape, Value};
