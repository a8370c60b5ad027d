use crate::config::Settings;
use crate::errors::{Result, UnstackedError};
use crate::git::GitRepository;
use crate::sign::Signer;
use crate::stack::stack::{slugify_title, Change, Stack};
use crate::stack::sync::{ChangeState, SyncEngine, SyncResult};
use crate::stack::sync_state::{SyncState, SyncStateEntry};
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Ref holding the serialized stack metadata blob
pub const METADATA_REF: &str = "refs/unstacked/stacks";

/// Ref recording the base a stack was last fully built on
pub fn base_marker_ref(stack_name: &str) -> String {
    format!("refs/unstacked/base/{stack_name}")
}

/// All stacks in the repository plus the active selection
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StackCollection {
    active: Option<String>,
    stacks: HashMap<String, Stack>,
}

/// Owns the stack metadata for one command invocation.
///
/// Metadata lives in a JSON blob behind `refs/unstacked/stacks`; the blob
/// ref is read once at load and written back with compare-and-swap, so a
/// concurrent invocation fails with `RefConflict` instead of losing
/// updates. Branch refs are the source of truth for commit hashes; the
/// metadata records identity, ordering and the last consistent hashes.
pub struct StackManager {
    git_repo: GitRepository,
    settings: Settings,
    collection: StackCollection,
    observed_metadata: Option<Oid>,
}

impl StackManager {
    pub fn new(git_repo: GitRepository, settings: Settings) -> Result<Self> {
        let store = git_repo.object_store();
        let observed_metadata = store.resolve_ref(METADATA_REF)?;
        let collection = match observed_metadata {
            Some(blob_oid) => {
                let data = store.read_blob(blob_oid)?;
                serde_json::from_slice(&data).map_err(|e| {
                    UnstackedError::config(format!("Failed to parse stack metadata: {e}"))
                })?
            }
            None => StackCollection::default(),
        };

        Ok(Self {
            git_repo,
            settings,
            collection,
            observed_metadata,
        })
    }

    pub fn git_repo(&self) -> &GitRepository {
        &self.git_repo
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn state_dir(&self) -> PathBuf {
        crate::config::repo_state_dir(&self.git_repo)
    }

    fn key_id(&self) -> Option<String> {
        self.settings.signing.key_id.clone()
    }

    /// Persist the metadata blob with compare-and-swap on its ref
    fn save(&mut self) -> Result<()> {
        let store = self.git_repo.object_store();
        let data = serde_json::to_vec_pretty(&self.collection)
            .map_err(|e| UnstackedError::config(format!("Failed to serialize metadata: {e}")))?;
        let blob_oid = store.write_blob(&data)?;

        if self.observed_metadata == Some(blob_oid) {
            return Ok(());
        }

        store.update_ref(METADATA_REF, self.observed_metadata, blob_oid)?;
        self.observed_metadata = Some(blob_oid);
        debug!("Saved stack metadata as {}", blob_oid);
        Ok(())
    }

    pub fn stack_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collection.stacks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn active_stack_name(&self) -> Result<String> {
        self.collection
            .active
            .clone()
            .ok_or_else(|| UnstackedError::config("No active stack. Create one with 'us stack new'."))
    }

    pub fn get_stack(&self, name: &str) -> Result<&Stack> {
        self.collection
            .stacks
            .get(name)
            .ok_or_else(|| UnstackedError::validation(format!("No stack named '{name}'")))
    }

    /// Create a new stack based on an upstream branch and make it active
    pub fn create_stack(&mut self, name: &str, upstream: Option<String>) -> Result<&Stack> {
        if name.is_empty() || name.contains('/') || name != slugify_title(name) {
            return Err(UnstackedError::validation(format!(
                "Invalid stack name '{name}' (use a lowercase slug)"
            )));
        }
        if self.collection.stacks.contains_key(name) {
            return Err(UnstackedError::validation(format!(
                "Stack '{name}' already exists"
            )));
        }

        let upstream = upstream.unwrap_or_else(|| self.settings.git.upstream_branch.clone());
        let store = self.git_repo.object_store();
        let upstream_ref = format!("refs/heads/{upstream}");
        let base = store
            .resolve_ref(&upstream_ref)?
            .ok_or_else(|| UnstackedError::branch(format!("Upstream branch '{upstream}' not found")))?;

        let marker = base_marker_ref(name);
        let observed_marker = store.resolve_ref(&marker)?;
        store.update_ref(&marker, observed_marker, base)?;

        let stack = Stack::new(name.to_string(), upstream, base.to_string());
        self.collection.stacks.insert(name.to_string(), stack);
        self.collection.active = Some(name.to_string());
        self.save()?;

        info!("Created stack '{}' on {}", name, base);
        self.get_stack(name)
    }

    /// Make another stack the active one
    pub fn switch_stack(&mut self, name: &str) -> Result<()> {
        if !self.collection.stacks.contains_key(name) {
            return Err(UnstackedError::validation(format!("No stack named '{name}'")));
        }
        self.collection.active = Some(name.to_string());
        self.save()
    }

    /// Delete a stack and all its refs. Refuses while its branches are
    /// checked out or a sync is in flight.
    pub fn delete_stack(&mut self, name: &str) -> Result<()> {
        let stack = self.get_stack(name)?.clone();

        if SyncState::exists(&self.state_dir(), name) {
            return Err(UnstackedError::validation(format!(
                "Stack '{name}' has a sync in progress; finish it first"
            )));
        }
        if let Ok(current) = self.git_repo.get_current_branch() {
            if stack.changes.iter().any(|c| c.branch == current) {
                return Err(UnstackedError::branch(format!(
                    "Branch '{current}' is checked out; switch away before deleting the stack"
                )));
            }
        }

        let store = self.git_repo.object_store();
        for change in &stack.changes {
            if store.resolve_ref(&change.ref_name())?.is_some() {
                store.delete_ref(&change.ref_name())?;
            }
        }
        let marker = base_marker_ref(name);
        if store.resolve_ref(&marker)?.is_some() {
            store.delete_ref(&marker)?;
        }

        self.collection.stacks.remove(name);
        if self.collection.active.as_deref() == Some(name) {
            self.collection.active = None;
        }
        self.save()?;

        info!("Deleted stack '{}'", name);
        Ok(())
    }

    /// Load a stack with commit hashes refreshed from its branch refs and
    /// the parent-chain invariant validated.
    ///
    /// With no sync in flight the chain must be strictly contiguous: the
    /// first change's parent is the recorded base, every later change's
    /// parent is its predecessor's commit. While a sync pass is in flight
    /// (its state file exists) commits may legitimately be parented on
    /// either the old chain or the new one; anything outside both sets
    /// means an external actor rewrote a branch and is `CorruptStack`.
    pub fn load_validated(&self, name: &str) -> Result<Stack> {
        let mut stack = self.get_stack(name)?.clone();
        stack.validate()?;

        let store = self.git_repo.object_store();
        let state = SyncState::load(&self.state_dir(), name)?;

        // Refresh hashes from refs: refs are the source of truth
        let mut current: Vec<Oid> = Vec::with_capacity(stack.len());
        for change in &mut stack.changes {
            let oid = store.resolve_ref(&change.ref_name())?.ok_or_else(|| {
                UnstackedError::corrupt_stack(
                    change.id,
                    format!("branch ref '{}' is missing", change.ref_name()),
                )
            })?;
            let commit = store.find_commit(oid)?;
            if commit.parent_count() != 1 {
                return Err(UnstackedError::corrupt_stack(
                    change.id,
                    format!("commit {} has {} parents, expected 1", oid, commit.parent_count()),
                ));
            }
            change.commit_hash = oid.to_string();
            current.push(oid);
        }

        match &state {
            None => {
                let mut expected = Oid::from_str(&stack.base_hash)?;
                for (i, change) in stack.changes.iter().enumerate() {
                    let commit = store.find_commit(current[i])?;
                    let parent = commit.parent_id(0)?;
                    if parent != expected {
                        return Err(UnstackedError::corrupt_stack(
                            change.id,
                            format!(
                                "parent chain broken: commit {} is parented on {}, expected {}",
                                current[i], parent, expected
                            ),
                        ));
                    }
                    expected = current[i];
                }
            }
            Some(state) => {
                // Mid-pass: parents must come from the old or new chain
                let mut allowed: HashSet<Oid> = HashSet::new();
                allowed.insert(Oid::from_str(&state.previous_base)?);
                allowed.insert(Oid::from_str(&state.target_base)?);
                allowed.insert(Oid::from_str(&stack.base_hash)?);
                for entry in &state.entries {
                    allowed.insert(Oid::from_str(&entry.old_hash)?);
                }
                for oid in &current {
                    allowed.insert(*oid);
                }

                for (i, change) in stack.changes.iter().enumerate() {
                    let commit = store.find_commit(current[i])?;
                    let parent = commit.parent_id(0)?;
                    if !allowed.contains(&parent) {
                        return Err(UnstackedError::corrupt_stack(
                            change.id,
                            format!(
                                "commit {} is parented on {}, which belongs to neither the old nor the new chain",
                                current[i], parent
                            ),
                        ));
                    }
                }
            }
        }

        Ok(stack)
    }

    /// Write (or extend) the durable record of a sync pass before any ref
    /// moves. Existing entries keep their pre-pass hashes so an interrupted
    /// pass can be resumed onto a newer target.
    fn begin_sync_state(&self, stack: &Stack, target: Oid) -> Result<()> {
        let dir = self.state_dir();
        let state = match SyncState::load(&dir, &stack.name)? {
            Some(mut state) => {
                state.target_base = target.to_string();
                for change in &stack.changes {
                    if state.old_hash_of(&change.id).is_none() {
                        state.entries.push(SyncStateEntry {
                            change_id: change.id,
                            branch: change.branch.clone(),
                            old_hash: change.commit_hash.clone(),
                        });
                    }
                }
                state
            }
            None => SyncState {
                stack_name: stack.name.clone(),
                previous_base: stack.base_hash.clone(),
                target_base: target.to_string(),
                entries: stack
                    .changes
                    .iter()
                    .map(|c| SyncStateEntry {
                        change_id: c.id,
                        branch: c.branch.clone(),
                        old_hash: c.commit_hash.clone(),
                    })
                    .collect(),
            },
        };
        state.save(&dir)
    }

    /// Commit a fully successful pass: base marker, metadata, state file
    fn finish_pass(&mut self, stack: Stack) -> Result<()> {
        let name = stack.name.clone();
        let store = self.git_repo.object_store();

        let marker = base_marker_ref(&name);
        let observed = store.resolve_ref(&marker)?;
        let base = Oid::from_str(&stack.base_hash)?;
        if observed != Some(base) {
            store.update_ref(&marker, observed, base)?;
        }

        self.collection.stacks.insert(name.clone(), stack);
        self.save()?;
        SyncState::delete(&self.state_dir(), &name)?;
        Ok(())
    }

    /// Resolve the commit a sync pass should rebase onto. An interrupted
    /// pass is resumed onto its recorded target; otherwise the upstream
    /// head wins.
    fn resolve_target(&self, stack: &Stack, onto: Option<&str>) -> Result<Oid> {
        if let Some(spec) = onto {
            return self.git_repo.resolve_committish(spec);
        }
        if let Some(state) = SyncState::load(&self.state_dir(), &stack.name)? {
            return Ok(Oid::from_str(&state.target_base)?);
        }

        let store = self.git_repo.object_store();
        let upstream_ref = format!("refs/heads/{}", stack.upstream);
        match store.resolve_ref(&upstream_ref)? {
            Some(oid) => Ok(oid),
            None => self.git_repo.resolve_committish(&stack.upstream),
        }
    }

    /// Base for operations that rewrite without changing the base: the
    /// in-flight pass's target when one exists, the recorded base
    /// otherwise.
    fn stable_target(&self, stack: &Stack) -> Result<Oid> {
        if let Some(state) = SyncState::load(&self.state_dir(), &stack.name)? {
            return Ok(Oid::from_str(&state.target_base)?);
        }
        Ok(Oid::from_str(&stack.base_hash)?)
    }

    /// Run a synchronization pass for the active stack
    pub fn sync(&mut self, signer: &dyn Signer, onto: Option<&str>) -> Result<SyncResult> {
        if self.git_repo.is_dirty()? {
            return Err(UnstackedError::validation(
                "Working directory has uncommitted changes; commit or stash them first \
                 (or run 'us sync --continue' to resolve a conflict)",
            ));
        }

        let name = self.active_stack_name()?;
        let mut stack = self.load_validated(&name)?;
        let target = self.resolve_target(&stack, onto)?;

        self.begin_sync_state(&stack, target)?;
        let result = {
            let engine =
                SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
            engine.synchronize(&mut stack, target)?
        };

        if result.success {
            self.finish_pass(stack)?;
        } else {
            warn!("Sync halted: {}", result.summary);
        }

        // If HEAD tracks a rewritten branch, bring the working tree along
        self.refresh_worktree()?;

        Ok(result)
    }

    /// Record which hashes were published, so a later pass can tell a
    /// stale remote (ours, safe to overwrite) from a diverged one.
    pub fn record_push(&mut self, name: &str, pushed: &[(String, String)]) -> Result<()> {
        let Some(stack) = self.collection.stacks.get_mut(name) else {
            return Err(UnstackedError::validation(format!("No stack named '{name}'")));
        };

        let mut touched = false;
        for (branch, hash) in pushed {
            if let Some(change) = stack.changes.iter_mut().find(|c| &c.branch == branch) {
                change.last_pushed_hash = Some(hash.clone());
                touched = true;
            }
        }
        if touched {
            self.save()?;
        }
        Ok(())
    }

    /// Resume an interrupted sync pass by accepting the working state as
    /// the resolution of the conflicted change.
    ///
    /// The conflicted change is the first one not yet parented on the new
    /// chain. The user is expected to have checked out the rewritten
    /// parent (or the target base for the bottom change) and reproduced
    /// the change's content on top of it; that tree becomes the change's
    /// rewritten commit, and the pass continues with the remaining
    /// changes.
    pub fn sync_continue(&mut self, signer: &dyn Signer) -> Result<SyncResult> {
        let name = self.active_stack_name()?;
        let mut stack = self.load_validated(&name)?;

        let state = SyncState::load(&self.state_dir(), &name)?.ok_or_else(|| {
            UnstackedError::config("No sync in progress. Run 'us sync' instead.")
        })?;
        let target = Oid::from_str(&state.target_base)?;

        // Locate the seam: the first change not on the new parent chain
        let store = self.git_repo.object_store();
        let mut new_parent = target;
        let mut conflicted = None;
        for (i, change) in stack.changes.iter().enumerate() {
            let commit = store.find_commit(Oid::from_str(&change.commit_hash)?)?;
            if commit.parent_id(0)? == new_parent {
                new_parent = commit.id();
                continue;
            }
            conflicted = Some(i);
            break;
        }

        let Some(index) = conflicted else {
            // Every change is already on the new chain; just finish
            let result = {
                let engine =
                    SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
                engine.synchronize(&mut stack, target)?
            };
            if result.success {
                self.finish_pass(stack)?;
            }
            return Ok(result);
        };

        let head = self.git_repo.head_commit_id()?;
        if head != new_parent {
            return Err(UnstackedError::validation(format!(
                "HEAD is at {head}, but the resolution must be built on {new_parent} \
                 (the rewritten parent of the conflicted change)"
            )));
        }

        let tree_oid = self.git_repo.capture_tree(false)?;
        let change = stack.changes[index].clone();
        let old_oid = Oid::from_str(&change.commit_hash)?;
        let old = store.find_commit(old_oid)?;
        let parent_commit = store.find_commit(new_parent)?;

        if tree_oid == parent_commit.tree_id() {
            return Err(UnstackedError::validation(
                "Working state is identical to the parent; nothing to resolve",
            ));
        }

        let tree = store.find_tree(tree_oid)?;
        let buffer = store.commit_buffer(
            &old.author(),
            &old.committer(),
            old.message().unwrap_or(""),
            &tree,
            &[&parent_commit],
        )?;
        let signature = signer.sign(&buffer, self.key_id().as_deref())?;
        let new_oid = store.write_signed_commit(&buffer, &signature)?;
        store.update_ref(&change.ref_name(), Some(old_oid), new_oid)?;

        if let Some(c) = stack.get_change_mut(&change.id) {
            c.commit_hash = new_oid.to_string();
        }
        info!(
            "Resolved change '{}' as {}; continuing sync",
            change.title, new_oid
        );

        // Rebase the remaining suffix
        let result = {
            let engine =
                SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
            engine.synchronize(&mut stack, target)?
        };
        if result.success {
            self.finish_pass(stack)?;
            self.refresh_worktree()?;
        }
        Ok(result)
    }

    /// Force the working tree and index back onto HEAD after its branch
    /// was rewritten underneath it
    fn refresh_worktree(&self) -> Result<()> {
        let repo = self.git_repo.inner();
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))
            .map_err(UnstackedError::Git)?;
        Ok(())
    }

    /// Generate a branch name for a new change, unique within the repo
    fn unique_branch(&self, stack: &Stack, title: &str) -> Result<String> {
        let store = self.git_repo.object_store();
        let base = format!(
            "{}/{}/{}",
            self.settings.git.branch_namespace,
            stack.name,
            slugify_title(title)
        );

        let mut candidate = base.clone();
        let mut counter = 1;
        while store
            .resolve_ref(&format!("refs/heads/{candidate}"))?
            .is_some()
        {
            candidate = format!("{base}-{counter}");
            counter += 1;
        }
        Ok(candidate)
    }

    /// Capture the working state as a new signed change on top of the stack
    pub fn new_change(
        &mut self,
        signer: &dyn Signer,
        title: &str,
        body: Option<&str>,
        use_index: bool,
    ) -> Result<Change> {
        let name = self.active_stack_name()?;
        let mut stack = self.load_validated(&name)?;

        if stack.len() >= self.settings.sync.max_stack_size {
            return Err(UnstackedError::validation(format!(
                "Stack '{}' already has {} changes (max_stack_size = {})",
                name,
                stack.len(),
                self.settings.sync.max_stack_size
            )));
        }

        let parent_oid = match stack.top() {
            Some(top) => Oid::from_str(&top.commit_hash)?,
            None => Oid::from_str(&stack.base_hash)?,
        };

        let head = self.git_repo.head_commit_id()?;
        if head != parent_oid {
            return Err(UnstackedError::validation(format!(
                "HEAD is at {head}, but new changes must be built on the stack tip {parent_oid}. \
                 Check out the top of the stack first."
            )));
        }

        let tree_oid = self.git_repo.capture_tree(use_index)?;
        let store = self.git_repo.object_store();
        let parent = store.find_commit(parent_oid)?;
        if tree_oid == parent.tree_id() {
            return Err(UnstackedError::validation("Nothing to commit"));
        }

        let message = match body {
            Some(body) => format!("{title}\n\n{body}"),
            None => title.to_string(),
        };

        let branch = self.unique_branch(&stack, title)?;
        let ref_name = format!("refs/heads/{branch}");

        let tree = store.find_tree(tree_oid)?;
        let sig = self.git_repo.signature()?;
        let buffer = store.commit_buffer(&sig, &sig, &message, &tree, &[&parent])?;
        let signature = signer.sign(&buffer, self.key_id().as_deref())?;
        let commit_oid = store.write_signed_commit(&buffer, &signature)?;
        store.update_ref(&ref_name, None, commit_oid)?;

        let change = Change::new(branch, commit_oid.to_string(), title.to_string());
        stack.push_change(change.clone());
        self.collection.stacks.insert(name, stack);
        self.save()?;

        // Move HEAD onto the new branch; the working tree already matches
        let repo = self.git_repo.inner();
        repo.set_head(&ref_name).map_err(UnstackedError::Git)?;
        let obj = repo
            .find_object(commit_oid, None)
            .map_err(UnstackedError::Git)?;
        repo.reset(&obj, git2::ResetType::Mixed, None)
            .map_err(UnstackedError::Git)?;

        info!("Created change '{}' as {}", title, commit_oid);
        Ok(change)
    }

    /// Replace a change's commit with the captured working state, then
    /// rebase its descendants. This is also the conflict-resolution path:
    /// edit the conflicted change until it no longer overlaps the new
    /// base, amend, and sync.
    pub fn amend_change(
        &mut self,
        signer: &dyn Signer,
        change_prefix: Option<&str>,
        message: Option<&str>,
        use_index: bool,
    ) -> Result<SyncResult> {
        let name = self.active_stack_name()?;
        let mut stack = self.load_validated(&name)?;

        let change = match change_prefix {
            Some(prefix) => stack.find_by_prefix(prefix)?.clone(),
            None => stack
                .top()
                .ok_or_else(|| UnstackedError::validation("Stack is empty"))?
                .clone(),
        };
        let target_id = change.id;
        let old_oid = Oid::from_str(&change.commit_hash)?;

        let head = self.git_repo.head_commit_id()?;
        if head != old_oid {
            return Err(UnstackedError::validation(format!(
                "HEAD is at {head}, but amending '{}' requires its branch '{}' to be checked out",
                change.title, change.branch
            )));
        }

        let tree_oid = self.git_repo.capture_tree(use_index)?;
        let store = self.git_repo.object_store();
        let old = store.find_commit(old_oid)?;
        if tree_oid == old.tree_id() && message.is_none() {
            return Err(UnstackedError::validation("Nothing to amend"));
        }

        // Record the pre-amend chain before any ref moves
        let target_base = self.stable_target(&stack)?;
        self.begin_sync_state(&stack, target_base)?;

        let parent = old.parent(0).map_err(|_| {
            UnstackedError::corrupt_stack(change.id, "change commit has no parent")
        })?;
        let tree = store.find_tree(tree_oid)?;
        let committer = self.git_repo.signature()?;
        let buffer = store.commit_buffer(
            &old.author(),
            &committer,
            message.unwrap_or_else(|| old.message().unwrap_or("")),
            &tree,
            &[&parent],
        )?;
        let signature = signer.sign(&buffer, self.key_id().as_deref())?;
        let new_oid = store.write_signed_commit(&buffer, &signature)?;
        store.update_ref(&change.ref_name(), Some(old_oid), new_oid)?;

        if let Some(c) = stack.get_change_mut(&target_id) {
            c.commit_hash = new_oid.to_string();
        }
        info!("Amended change '{}' as {}", change.title, new_oid);

        // Rebase descendants onto the amended commit
        let result = {
            let engine =
                SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
            engine.synchronize(&mut stack, target_base)?
        };

        if result.success {
            self.finish_pass(stack)?;
        }

        // Keep HEAD and the index on the amended commit
        let repo = self.git_repo.inner();
        let obj = repo
            .find_object(new_oid, None)
            .map_err(UnstackedError::Git)?;
        repo.reset(&obj, git2::ResetType::Mixed, None)
            .map_err(UnstackedError::Git)?;

        Ok(result)
    }

    /// Drop a change from the stack and rebase its descendants over the gap
    pub fn remove_change(
        &mut self,
        signer: &dyn Signer,
        change_prefix: &str,
    ) -> Result<SyncResult> {
        let name = self.active_stack_name()?;
        let stack = self.load_validated(&name)?;
        let removed = stack.find_by_prefix(change_prefix)?.clone();

        if let Ok(current) = self.git_repo.get_current_branch() {
            if current == removed.branch {
                return Err(UnstackedError::branch(format!(
                    "Branch '{current}' is checked out; switch away before removing the change"
                )));
            }
        }

        let target_base = self.stable_target(&stack)?;
        self.begin_sync_state(&stack, target_base)?;

        let mut reordered = stack.remove(&removed.id)?;
        let result = {
            let engine =
                SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
            engine.synchronize(&mut reordered, target_base)?
        };

        if !result.success {
            return Err(conflict_error(&result));
        }

        let store = self.git_repo.object_store();
        if store.resolve_ref(&removed.ref_name())?.is_some() {
            store.delete_ref(&removed.ref_name())?;
        }
        self.finish_pass(reordered)?;
        self.refresh_worktree()?;
        info!("Removed change '{}'", removed.title);
        Ok(result)
    }

    /// Move a change to a new position and rewrite everything affected
    pub fn reorder_change(
        &mut self,
        signer: &dyn Signer,
        change_prefix: &str,
        new_index: usize,
    ) -> Result<SyncResult> {
        let name = self.active_stack_name()?;
        let stack = self.load_validated(&name)?;
        let change_id = stack.find_by_prefix(change_prefix)?.id;

        let target_base = self.stable_target(&stack)?;
        self.begin_sync_state(&stack, target_base)?;

        let mut reordered = stack.reorder(&change_id, new_index)?;
        let result = {
            let engine =
                SyncEngine::new(self.git_repo.object_store(), signer, self.key_id());
            engine.synchronize(&mut reordered, target_base)?
        };

        if !result.success {
            return Err(conflict_error(&result));
        }
        self.finish_pass(reordered)?;
        self.refresh_worktree()?;
        Ok(result)
    }

    /// Land the bottom change: fast-forward the upstream branch to it by
    /// compare-and-swap and drop it from the stack. Requires the change to
    /// be parented on the current upstream head.
    pub fn land(&mut self) -> Result<Change> {
        let name = self.active_stack_name()?;
        let mut stack = self.load_validated(&name)?;
        let bottom = stack
            .bottom()
            .ok_or_else(|| UnstackedError::validation("Stack is empty; nothing to land"))?
            .clone();

        let store = self.git_repo.object_store();
        let upstream_ref = format!("refs/heads/{}", stack.upstream);
        let upstream_head = store.resolve_ref(&upstream_ref)?.ok_or_else(|| {
            UnstackedError::branch(format!("Upstream branch '{}' not found", stack.upstream))
        })?;
        let bottom_oid = Oid::from_str(&bottom.commit_hash)?;

        if upstream_head == bottom_oid {
            // A previous land was interrupted after the upstream moved;
            // finish the bookkeeping.
            debug!("Upstream already at {}; completing interrupted land", bottom_oid);
        } else {
            let commit = store.find_commit(bottom_oid)?;
            let parent = commit.parent_id(0)?;
            if parent != upstream_head {
                return Err(UnstackedError::validation(format!(
                    "Change '{}' is based on {parent}, but '{}' is at {upstream_head}. \
                     Run 'us sync' first.",
                    bottom.title, stack.upstream
                )));
            }
            store.update_ref(&upstream_ref, Some(upstream_head), bottom_oid)?;
        }

        // If the landed branch is checked out, move HEAD to the upstream
        // branch (same commit, same content).
        if let Ok(current) = self.git_repo.get_current_branch() {
            if current == bottom.branch {
                self.git_repo
                    .inner()
                    .set_head(&upstream_ref)
                    .map_err(UnstackedError::Git)?;
            }
        }

        stack.changes.remove(0);
        stack.base_hash = bottom_oid.to_string();
        self.finish_pass(stack)?;

        let store = self.git_repo.object_store();
        if store.resolve_ref(&bottom.ref_name())?.is_some() {
            store.delete_ref(&bottom.ref_name())?;
        }

        info!("Landed change '{}' onto {}", bottom.title, upstream_ref);
        Ok(bottom)
    }

    /// Delete refs in the tool's branch namespace that no stack references.
    /// Returns the deleted ref names.
    pub fn cleanup(&self) -> Result<Vec<String>> {
        let store = self.git_repo.object_store();
        let glob = format!("refs/heads/{}/*", self.settings.git.branch_namespace);

        let known: HashSet<String> = self
            .collection
            .stacks
            .values()
            .flat_map(|s| s.changes.iter().map(|c| c.ref_name()))
            .collect();
        let current = self.git_repo.get_current_branch().ok();

        let mut deleted = Vec::new();
        for (name, _) in store.list_refs(&glob)? {
            if known.contains(&name) {
                continue;
            }
            if let Some(current) = &current {
                if name == format!("refs/heads/{current}") {
                    warn!("Skipping orphaned ref {name}: currently checked out");
                    continue;
                }
            }
            store.delete_ref(&name)?;
            deleted.push(name);
        }

        if !deleted.is_empty() {
            info!("Cleaned up {} orphaned ref(s)", deleted.len());
        }
        Ok(deleted)
    }

    /// Verify the signature of every change commit in the active stack
    /// against the configured key. Returns the number of verified commits.
    pub fn verify(&self, signer: &dyn Signer) -> Result<usize> {
        let name = self.active_stack_name()?;
        let stack = self.load_validated(&name)?;
        let store = self.git_repo.object_store();
        let key_id = self.key_id();

        for change in &stack.changes {
            let oid = Oid::from_str(&change.commit_hash)?;
            let (signature, payload) =
                store.extract_signature(oid)?.ok_or_else(|| {
                    UnstackedError::VerificationFailed {
                        commit: change.commit_hash.clone(),
                    }
                })?;
            if !signer.verify(&payload, &signature, key_id.as_deref())? {
                return Err(UnstackedError::VerificationFailed {
                    commit: change.commit_hash.clone(),
                });
            }
        }
        Ok(stack.len())
    }

    /// Whether a sync pass for the given stack was interrupted
    pub fn sync_in_progress(&self, name: &str) -> bool {
        SyncState::exists(&self.state_dir(), name)
    }
}

/// A reorder/remove pass that conflicts cannot complete; surface the
/// conflicted change. Refs rewritten before the halt stay durable and
/// 'us sync --continue' walks the stack back toward its recorded order.
fn conflict_error(result: &SyncResult) -> UnstackedError {
    match result.conflicted() {
        Some(outcome) => {
            let paths = match &outcome.state {
                ChangeState::Conflicted { paths } => paths.clone(),
                _ => Vec::new(),
            };
            UnstackedError::Conflict {
                change_id: outcome.change_id,
                paths,
            }
        }
        None => UnstackedError::validation("Synchronization pass failed"),
    }
}
