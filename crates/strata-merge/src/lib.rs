//! Structural merge engine for Strata.
//!
//! Reconciles three versions of a [`Value`](strata_types::Value) tree (a
//! common ancestor plus two divergent edits) into one, field by field and
//! element by element. The rules are chosen so that concurrent edits to
//! different parts of an entity never step on each other:
//!
//! - scalars take whichever side changed, with a mode-dependent bias when
//!   both did;
//! - counters add up the independent deltas;
//! - sets, sequences and keyed maps keep every independent insertion and
//!   honour a removal made on either side;
//! - records recurse into each field.
//!
//! The engine is pure: no I/O, no shared state, safe to call from any thread.

mod collections;
pub mod error;
mod merger;
pub mod mode;
mod path;

pub use error::{MergeError, MergeResult};
pub use merger::{apply, apply_all, merge, merge_all};
pub use mode::MergeMode;
