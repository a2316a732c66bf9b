//! Shared and weak ownership pointers, built by hand on an explicit
//! control-block protocol.
//!
//! Where `Rc` hides its bookkeeping, this crate spells it out: every
//! ownership group is a control block holding a strong and a weak counter
//! plus a type-erased destroy capability. [`Shared`] handles keep the
//! payload alive; [`Weak`] observers keep only the block alive and can ask
//! to be promoted back into owners while the payload still exists. The
//! payload is destroyed at the strong counter's zero-transition, the block
//! is freed at the combined zero-transition, each exactly once.
//!
//! Two allocation strategies back this: [`Shared::from_box`] adopts an
//! existing allocation and puts the block beside it, [`Shared::new`]
//! constructs payload and block together in one allocation. A handle can
//! also be projected ([`Shared::project`]) to observe a sub-object, or a
//! trait-object view, of the payload it keeps alive.
//!
//! Caveat: the counters are plain `Cell`s with no synchronization, so the
//! pointer types do not implement `Send` or `Sync`. This is the
//! single-threaded sibling of `Arc`, not a replacement for it.
//!
//! The [`thread_stats`] ledger exposes block traffic for leak diagnosis;
//! with the default `global` feature, exited threads fold their tallies
//! into a process-wide [`global_stats`] view.

pub(crate) mod blocks;
pub(crate) mod ledger;
pub mod pointers;
pub mod stats;

pub use crate::ledger::thread_stats;
pub use crate::pointers::{Shared, Weak};
pub use crate::stats::Stats;

#[cfg(feature = "global")]
pub use crate::ledger::global_stats;

#[cfg(test)]
mod tests;
