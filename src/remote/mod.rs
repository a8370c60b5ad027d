pub mod reconcile;

pub use reconcile::{Reconciler, ReconciliationRecord, RefRelationship};
