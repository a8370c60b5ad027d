use crate::errors::{Result, UnstackedError};
use crate::git::store::{MergeOutcome, ObjectStore};
use crate::sign::Signer;
use crate::stack::Stack;
use chrono::Utc;
use git2::Oid;
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal state of one change after a sync pass
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeState {
    /// Rebased onto the new parent chain and published
    Rewritten { new_hash: String },
    /// Already based on the correct parent; nothing written
    Unchanged,
    /// Overlapping edits; the user must resolve and resume
    Conflicted { paths: Vec<String> },
    /// Not processed because an earlier change conflicted
    Skipped,
}

/// Outcome for a single change
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    pub change_id: Uuid,
    pub branch: String,
    pub title: String,
    pub state: ChangeState,
}

/// Result of a synchronization pass
#[derive(Debug)]
pub struct SyncResult {
    /// True when every change reached Rewritten or Unchanged
    pub success: bool,
    /// Per-change outcomes in stack order
    pub outcomes: Vec<ChangeOutcome>,
    /// Human-readable summary of what happened
    pub summary: String,
}

impl SyncResult {
    pub fn conflicted(&self) -> Option<&ChangeOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.state, ChangeState::Conflicted { .. }))
    }

    pub fn rewritten_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, ChangeState::Rewritten { .. }))
            .count()
    }

    pub fn unchanged_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == ChangeState::Unchanged)
            .count()
    }
}

/// The controlled-rebase engine.
///
/// Processes changes strictly in stack order: each change's new commit is
/// parented on the previous change's new commit (or the new base for the
/// first). Rewritten commits are signed before they are written, and each
/// branch ref is published with compare-and-swap against the hash observed
/// at load time. The pass halts at the first conflict, leaving earlier
/// rewrites durable and later changes untouched.
pub struct SyncEngine<'a> {
    store: ObjectStore<'a>,
    signer: &'a dyn Signer,
    key_id: Option<String>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: ObjectStore<'a>, signer: &'a dyn Signer, key_id: Option<String>) -> Self {
        Self {
            store,
            signer,
            key_id,
        }
    }

    /// Rebase `stack` onto `target_base`.
    ///
    /// Mutates the in-memory stack (commit hashes, base hash on success);
    /// persisting the metadata is the caller's job. Ref updates for
    /// rewritten changes happen here and are durable regardless of how
    /// the rest of the pass ends.
    pub fn synchronize(&self, stack: &mut Stack, target_base: Oid) -> Result<SyncResult> {
        debug!(
            "Synchronizing stack '{}' ({} changes) onto {}",
            stack.name,
            stack.len(),
            target_base
        );

        let mut outcomes: Vec<ChangeOutcome> = Vec::with_capacity(stack.len());
        let mut new_parent = target_base;
        let mut halted = false;

        for change in &mut stack.changes {
            if halted {
                outcomes.push(ChangeOutcome {
                    change_id: change.id,
                    branch: change.branch.clone(),
                    title: change.title.clone(),
                    state: ChangeState::Skipped,
                });
                continue;
            }

            let old_oid = Oid::from_str(&change.commit_hash)?;
            let old = self.store.find_commit(old_oid)?;
            let old_parent = old.parent(0).map_err(|_| {
                UnstackedError::corrupt_stack(change.id, "change commit has no parent")
            })?;

            if old_parent.id() == new_parent {
                new_parent = old.id();
                outcomes.push(ChangeOutcome {
                    change_id: change.id,
                    branch: change.branch.clone(),
                    title: change.title.clone(),
                    state: ChangeState::Unchanged,
                });
                continue;
            }

            let new_parent_commit = self.store.find_commit(new_parent)?;
            let base_tree = old_parent.tree()?;
            let our_tree = new_parent_commit.tree()?;
            let their_tree = old.tree()?;

            match self.store.merge_trees(&base_tree, &our_tree, &their_tree)? {
                MergeOutcome::Conflicts(paths) => {
                    warn!(
                        "Change {} ({}) conflicts in {} path(s); halting",
                        change.id,
                        change.title,
                        paths.len()
                    );
                    outcomes.push(ChangeOutcome {
                        change_id: change.id,
                        branch: change.branch.clone(),
                        title: change.title.clone(),
                        state: ChangeState::Conflicted { paths },
                    });
                    halted = true;
                }
                MergeOutcome::Clean(tree_id) => {
                    let tree = self.store.find_tree(tree_id)?;
                    // Author, committer and message are carried over
                    // byte-for-byte; only tree and parent change.
                    let buffer = self.store.commit_buffer(
                        &old.author(),
                        &old.committer(),
                        old.message().unwrap_or(""),
                        &tree,
                        &[&new_parent_commit],
                    )?;
                    let signature = self.signer.sign(&buffer, self.key_id.as_deref())?;
                    let new_oid = self.store.write_signed_commit(&buffer, &signature)?;

                    self.store
                        .update_ref(&change.ref_name(), Some(old.id()), new_oid)?;

                    debug!("Rewrote change {}: {} -> {}", change.id, old.id(), new_oid);
                    change.commit_hash = new_oid.to_string();
                    change.updated_at = Utc::now();
                    outcomes.push(ChangeOutcome {
                        change_id: change.id,
                        branch: change.branch.clone(),
                        title: change.title.clone(),
                        state: ChangeState::Rewritten {
                            new_hash: new_oid.to_string(),
                        },
                    });
                    new_parent = new_oid;
                }
            }
        }

        let success = !halted;
        if success {
            stack.base_hash = target_base.to_string();
        }

        let result = SyncResult {
            success,
            summary: summarize(&outcomes, success),
            outcomes,
        };
        Ok(result)
    }
}

fn summarize(outcomes: &[ChangeOutcome], success: bool) -> String {
    let rewritten = outcomes
        .iter()
        .filter(|o| matches!(o.state, ChangeState::Rewritten { .. }))
        .count();
    let unchanged = outcomes
        .iter()
        .filter(|o| o.state == ChangeState::Unchanged)
        .count();

    if success {
        format!("{rewritten} rewritten, {unchanged} unchanged")
    } else {
        let skipped = outcomes
            .iter()
            .filter(|o| o.state == ChangeState::Skipped)
            .count();
        format!("{rewritten} rewritten, {unchanged} unchanged, 1 conflicted, {skipped} skipped")
    }
}
