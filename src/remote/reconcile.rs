use crate::errors::{Result, UnstackedError};
use crate::git::GitRepository;
use crate::stack::Stack;
use git2::Oid;
use tracing::{debug, info};
use uuid::Uuid;

/// How a change's remote branch relates to the local one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefRelationship {
    /// Remote and local hashes are equal
    UpToDate,
    /// Remote is an ancestor of local; safe to force-update since this
    /// tool is the sole writer of its own rewritten history
    Ahead,
    /// Local is an ancestor of the remote: someone pushed commits on top
    /// of ours. Externally authored, never overwritten silently.
    Behind,
    /// Histories share no ancestor/descendant relationship
    Diverged,
    /// The branch has never been pushed
    RemoteMissing,
}

/// Transient comparison of one change against the remote.
/// Computed fresh on every pass, never persisted.
#[derive(Debug, Clone)]
pub struct ReconciliationRecord {
    pub change_id: Uuid,
    pub branch: String,
    pub title: String,
    pub local_hash: String,
    pub remote_hash: Option<String>,
    pub relationship: RefRelationship,
}

impl ReconciliationRecord {
    /// Whether pushing this branch would change the remote
    pub fn needs_push(&self) -> bool {
        self.relationship != RefRelationship::UpToDate
    }

    /// Whether pushing would overwrite history this tool did not write
    pub fn needs_confirmation(&self) -> bool {
        matches!(
            self.relationship,
            RefRelationship::Diverged | RefRelationship::Behind
        )
    }
}

/// Compares local stack state against a remote and publishes branches.
pub struct Reconciler<'a> {
    git_repo: &'a GitRepository,
    remote_name: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(git_repo: &'a GitRepository, remote_name: String) -> Self {
        Self {
            git_repo,
            remote_name,
        }
    }

    fn remote_tracking_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, branch)
    }

    /// Fetch the remote's current refs (with pruning, so deleted remote
    /// branches disappear from the tracking namespace).
    pub fn fetch(&self) -> Result<()> {
        let repo = self.git_repo.inner();
        let mut remote = repo.find_remote(&self.remote_name).map_err(|e| {
            UnstackedError::branch(format!("Remote '{}' not found: {e}", self.remote_name))
        })?;

        let auth = auth_git2::GitAuthenticator::default();
        let config = repo.config().map_err(UnstackedError::Git)?;
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(auth.credentials(&config));

        let mut opts = git2::FetchOptions::new();
        opts.remote_callbacks(callbacks);
        opts.prune(git2::FetchPrune::On);

        remote
            .fetch(&[] as &[&str], Some(&mut opts), None)
            .map_err(UnstackedError::Git)?;

        debug!("Fetched remote '{}'", self.remote_name);
        Ok(())
    }

    /// Classify every change branch against the remote tracking refs.
    /// Call `fetch` first for a current view.
    pub fn classify(&self, stack: &Stack) -> Result<Vec<ReconciliationRecord>> {
        let repo = self.git_repo.inner();
        let store = self.git_repo.object_store();
        let mut records = Vec::with_capacity(stack.len());

        for change in &stack.changes {
            let local = Oid::from_str(&change.commit_hash)?;
            let remote = store.resolve_ref(&self.remote_tracking_ref(&change.branch))?;

            let relationship = match remote {
                None => RefRelationship::RemoteMissing,
                Some(remote) if remote == local => RefRelationship::UpToDate,
                // The remote is exactly where this tool left it: a stale
                // copy of our own (since rewritten) history.
                Some(remote)
                    if change.last_pushed_hash.as_deref()
                        == Some(remote.to_string().as_str()) =>
                {
                    RefRelationship::Ahead
                }
                Some(remote) => {
                    if repo
                        .graph_descendant_of(local, remote)
                        .map_err(UnstackedError::Git)?
                    {
                        RefRelationship::Ahead
                    } else if repo
                        .graph_descendant_of(remote, local)
                        .map_err(UnstackedError::Git)?
                    {
                        RefRelationship::Behind
                    } else {
                        RefRelationship::Diverged
                    }
                }
            };

            records.push(ReconciliationRecord {
                change_id: change.id,
                branch: change.branch.clone(),
                title: change.title.clone(),
                local_hash: change.commit_hash.clone(),
                remote_hash: remote.map(|o| o.to_string()),
                relationship,
            });
        }

        Ok(records)
    }

    /// Push branches to the remote. `Ahead` and `RemoteMissing` branches
    /// are force-updated freely; `Diverged`/`Behind` branches only when
    /// `overwrite_diverged` is set; the caller is responsible for having
    /// obtained explicit confirmation. Returns the pushed branch names;
    /// branches requiring confirmation that was not given are skipped.
    pub fn push(
        &self,
        records: &[ReconciliationRecord],
        overwrite_diverged: bool,
    ) -> Result<Vec<String>> {
        let mut refspecs = Vec::new();
        let mut pushed = Vec::new();

        for record in records {
            if !record.needs_push() {
                continue;
            }
            if record.needs_confirmation() && !overwrite_diverged {
                debug!(
                    "Skipping {} ({:?}): confirmation required",
                    record.branch, record.relationship
                );
                continue;
            }
            refspecs.push(format!(
                "+refs/heads/{}:refs/heads/{}",
                record.branch, record.branch
            ));
            pushed.push(record.branch.clone());
        }

        if refspecs.is_empty() {
            return Ok(pushed);
        }

        self.push_refspecs(&refspecs)?;

        // Keep the tracking refs in step so a fresh classify sees the push
        let repo = self.git_repo.inner();
        for record in records {
            if pushed.contains(&record.branch) {
                let local = Oid::from_str(&record.local_hash)?;
                repo.reference(
                    &self.remote_tracking_ref(&record.branch),
                    local,
                    true,
                    "unstacked: push",
                )
                .map_err(UnstackedError::Git)?;
            }
        }

        info!(
            "Pushed {} branch(es) to '{}'",
            pushed.len(),
            self.remote_name
        );
        Ok(pushed)
    }

    /// Delete a branch on the remote (used after landing a change)
    pub fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        self.push_refspecs(&[format!(":refs/heads/{branch}")])?;

        let tracking = self.remote_tracking_ref(branch);
        let store = self.git_repo.object_store();
        if store.resolve_ref(&tracking)?.is_some() {
            store.delete_ref(&tracking)?;
        }

        info!("Deleted '{}' on remote '{}'", branch, self.remote_name);
        Ok(())
    }

    /// Push the upstream branch itself (after a land). Deliberately not a
    /// force push: a rejected fast-forward means the remote upstream holds
    /// commits we have not seen.
    pub fn push_upstream(&self, upstream: &str) -> Result<()> {
        self.push_refspecs(&[format!(
            "refs/heads/{upstream}:refs/heads/{upstream}"
        )])
        .map_err(|e| match e {
            UnstackedError::Git(ref g) if g.code() == git2::ErrorCode::NotFastForward => {
                UnstackedError::Diverged {
                    branch: upstream.to_string(),
                }
            }
            other => other,
        })?;
        info!("Pushed '{}' to '{}'", upstream, self.remote_name);
        Ok(())
    }

    fn push_refspecs(&self, refspecs: &[String]) -> Result<()> {
        let repo = self.git_repo.inner();
        let mut remote = repo.find_remote(&self.remote_name).map_err(|e| {
            UnstackedError::branch(format!("Remote '{}' not found: {e}", self.remote_name))
        })?;

        let auth = auth_git2::GitAuthenticator::default();
        let config = repo.config().map_err(UnstackedError::Git)?;
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(auth.credentials(&config));

        let mut opts = git2::PushOptions::new();
        opts.remote_callbacks(callbacks);

        remote
            .push(refspecs, Some(&mut opts))
            .map_err(UnstackedError::Git)?;
        Ok(())
    }
}
