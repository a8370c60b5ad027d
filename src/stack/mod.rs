//! Stack management module
//!
//! The core stacked-diff machinery:
//! - Stack and Change data structures (stable identity across rewrites)
//! - Stack persistence and invariant validation
//! - The synchronization engine (rebase, conflicts, signing, ref updates)

pub mod manager;
pub mod stack;
pub mod sync;
pub mod sync_state;

pub use manager::StackManager;
pub use stack::{slugify_title, Change, Stack};
pub use sync::{ChangeOutcome, ChangeState, SyncEngine, SyncResult};
pub use sync_state::SyncState;
