use crate::errors::{Result, UnstackedError};
use git2::{Commit, Oid, Repository, Signature, Tree};
use tracing::debug;

/// Result of a three-way tree merge
#[derive(Debug)]
pub enum MergeOutcome {
    /// Merge applied cleanly; the merged tree id
    Clean(Oid),
    /// Overlapping hunks; the conflicting paths, sorted
    Conflicts(Vec<String>),
}

/// Content-addressed read/write access to the repository object database
/// and its refs. All on-disk side effects of the engine go through here.
pub struct ObjectStore<'a> {
    repo: &'a Repository,
}

impl<'a> ObjectStore<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &'a Repository {
        self.repo
    }

    /// Look up a commit by id
    pub fn find_commit(&self, id: Oid) -> Result<Commit<'a>> {
        self.repo.find_commit(id).map_err(UnstackedError::Git)
    }

    /// Look up a tree by id
    pub fn find_tree(&self, id: Oid) -> Result<Tree<'a>> {
        self.repo.find_tree(id).map_err(UnstackedError::Git)
    }

    /// Read a blob's content
    pub fn read_blob(&self, id: Oid) -> Result<Vec<u8>> {
        let blob = self.repo.find_blob(id).map_err(UnstackedError::Git)?;
        Ok(blob.content().to_vec())
    }

    /// Write a blob. Content-addressed: writing identical content twice
    /// returns the same id and performs no duplicate work.
    pub fn write_blob(&self, data: &[u8]) -> Result<Oid> {
        self.repo.blob(data).map_err(UnstackedError::Git)
    }

    /// Resolve a ref name to the commit id it points at
    pub fn resolve_ref(&self, name: &str) -> Result<Option<Oid>> {
        match self.repo.find_reference(name) {
            Ok(reference) => {
                let oid = reference
                    .peel_to_commit()
                    .map(|c| c.id())
                    .or_else(|_| {
                        reference.target().ok_or_else(|| {
                            git2::Error::from_str("reference has no direct target")
                        })
                    })
                    .map_err(UnstackedError::Git)?;
                Ok(Some(oid))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare-and-swap ref update. `expected` is the value last observed
    /// (`None` means the ref must not exist yet). A mismatch fails with
    /// `RefConflict` and leaves the ref at the externally-set value.
    pub fn update_ref(&self, name: &str, expected: Option<Oid>, new: Oid) -> Result<()> {
        match expected {
            Some(old) => {
                match self
                    .repo
                    .reference_matching(name, new, true, old, "unstacked: update")
                {
                    Ok(_) => {
                        debug!("Updated ref {} {} -> {}", name, old, new);
                        Ok(())
                    }
                    Err(e) if e.code() == git2::ErrorCode::Modified => {
                        let actual = self
                            .resolve_ref(name)?
                            .map(|o| o.to_string())
                            .unwrap_or_else(|| "<deleted>".to_string());
                        Err(UnstackedError::ref_conflict(name, &old.to_string(), &actual))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            None => match self.repo.reference(name, new, false, "unstacked: create") {
                Ok(_) => {
                    debug!("Created ref {} -> {}", name, new);
                    Ok(())
                }
                Err(e) if e.code() == git2::ErrorCode::Exists => {
                    let actual = self
                        .resolve_ref(name)?
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    Err(UnstackedError::ref_conflict(name, "<none>", &actual))
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Delete a ref
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        let mut reference = self.repo.find_reference(name).map_err(UnstackedError::Git)?;
        reference.delete().map_err(UnstackedError::Git)?;
        debug!("Deleted ref {}", name);
        Ok(())
    }

    /// List refs matching a glob, with the commit each points at
    pub fn list_refs(&self, glob: &str) -> Result<Vec<(String, Oid)>> {
        let mut out = Vec::new();
        for reference in self
            .repo
            .references_glob(glob)
            .map_err(UnstackedError::Git)?
        {
            let reference = reference.map_err(UnstackedError::Git)?;
            let name = match reference.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            if let Ok(commit) = reference.peel_to_commit() {
                out.push((name, commit.id()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Three-way tree merge with rename detection. Conflicting paths are
    /// reported, never resolved here.
    pub fn merge_trees(
        &self,
        ancestor: &Tree<'_>,
        ours: &Tree<'_>,
        theirs: &Tree<'_>,
    ) -> Result<MergeOutcome> {
        let mut opts = git2::MergeOptions::new();
        opts.find_renames(true);

        let mut index = self
            .repo
            .merge_trees(ancestor, ours, theirs, Some(&opts))
            .map_err(UnstackedError::Git)?;

        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts().map_err(UnstackedError::Git)? {
                let conflict = conflict.map_err(UnstackedError::Git)?;
                let entry = conflict
                    .our
                    .or(conflict.their)
                    .or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(String::from_utf8_lossy(&entry.path).to_string());
                }
            }
            paths.sort();
            paths.dedup();
            return Ok(MergeOutcome::Conflicts(paths));
        }

        let tree_id = index.write_tree_to(self.repo).map_err(UnstackedError::Git)?;
        Ok(MergeOutcome::Clean(tree_id))
    }

    /// Canonical serialized commit payload. This is exactly what gets
    /// signed: the commit object minus its signature field.
    pub fn commit_buffer(
        &self,
        author: &Signature<'_>,
        committer: &Signature<'_>,
        message: &str,
        tree: &Tree<'_>,
        parents: &[&Commit<'_>],
    ) -> Result<String> {
        let buffer = self
            .repo
            .commit_create_buffer(author, committer, message, tree, parents)
            .map_err(UnstackedError::Git)?;
        let buffer = buffer
            .as_str()
            .ok_or_else(|| UnstackedError::validation("Commit buffer is not valid UTF-8"))?;
        Ok(buffer.to_string())
    }

    /// Persist a commit together with its detached signature. Does not
    /// touch any ref.
    pub fn write_signed_commit(&self, buffer: &str, signature: &str) -> Result<Oid> {
        let oid = self
            .repo
            .commit_signed(buffer, signature, None)
            .map_err(UnstackedError::Git)?;
        debug!("Wrote signed commit {}", oid);
        Ok(oid)
    }

    /// Extract a commit's signature and the payload it covers.
    /// `Ok(None)` when the commit is unsigned.
    pub fn extract_signature(&self, id: Oid) -> Result<Option<(String, String)>> {
        match self.repo.extract_signature(&id, None) {
            Ok((sig, payload)) => {
                let sig = String::from_utf8_lossy(&sig).to_string();
                let payload = String::from_utf8_lossy(&payload).to_string();
                Ok(Some((sig, payload)))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UnstackedError;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, Repository) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        (tmp, repo)
    }

    fn write_tree(repo: &Repository, entries: &[(&str, &str)]) -> Oid {
        let mut builder = repo.treebuilder(None).unwrap();
        for (name, content) in entries {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(name, blob, 0o100644).unwrap();
        }
        builder.write().unwrap()
    }

    fn commit_tree(repo: &Repository, tree: Oid, parents: &[Oid], message: &str) -> Oid {
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let tree = repo.find_tree(tree).unwrap();
        let parents: Vec<_> = parents
            .iter()
            .map(|p| repo.find_commit(*p).unwrap())
            .collect();
        let parent_refs: Vec<_> = parents.iter().collect();
        repo.commit(None, &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_write_blob_is_idempotent() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let a = store.write_blob(b"same content").unwrap();
        let b = store.write_blob(b"same content").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_update_ref_cas_detects_external_move() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let t1 = write_tree(&repo, &[("a.txt", "one")]);
        let c1 = commit_tree(&repo, t1, &[], "one");
        let t2 = write_tree(&repo, &[("a.txt", "two")]);
        let c2 = commit_tree(&repo, t2, &[c1], "two");
        let t3 = write_tree(&repo, &[("a.txt", "three")]);
        let c3 = commit_tree(&repo, t3, &[c1], "three");

        store
            .update_ref("refs/heads/unstacked/test", None, c1)
            .unwrap();

        // External move
        repo.reference("refs/heads/unstacked/test", c2, true, "external")
            .unwrap();

        // CAS from the stale observation fails and preserves the external value
        let err = store
            .update_ref("refs/heads/unstacked/test", Some(c1), c3)
            .unwrap_err();
        assert!(matches!(err, UnstackedError::RefConflict { .. }));
        assert_eq!(
            store.resolve_ref("refs/heads/unstacked/test").unwrap(),
            Some(c2)
        );
    }

    #[test]
    fn test_update_ref_create_requires_absence() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let t1 = write_tree(&repo, &[("a.txt", "one")]);
        let c1 = commit_tree(&repo, t1, &[], "one");

        store.update_ref("refs/heads/unstacked/x", None, c1).unwrap();
        let err = store
            .update_ref("refs/heads/unstacked/x", None, c1)
            .unwrap_err();
        assert!(matches!(err, UnstackedError::RefConflict { .. }));
    }

    #[test]
    fn test_merge_trees_clean() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let base = write_tree(&repo, &[("a.txt", "base\n"), ("b.txt", "base\n")]);
        let ours = write_tree(&repo, &[("a.txt", "ours\n"), ("b.txt", "base\n")]);
        let theirs = write_tree(&repo, &[("a.txt", "base\n"), ("b.txt", "theirs\n")]);

        let base = repo.find_tree(base).unwrap();
        let ours = repo.find_tree(ours).unwrap();
        let theirs = repo.find_tree(theirs).unwrap();

        match store.merge_trees(&base, &ours, &theirs).unwrap() {
            MergeOutcome::Clean(tree_id) => {
                let tree = repo.find_tree(tree_id).unwrap();
                let a = tree.get_name("a.txt").unwrap().id();
                let b = tree.get_name("b.txt").unwrap().id();
                assert_eq!(repo.find_blob(a).unwrap().content(), b"ours\n");
                assert_eq!(repo.find_blob(b).unwrap().content(), b"theirs\n");
            }
            MergeOutcome::Conflicts(paths) => panic!("unexpected conflicts: {paths:?}"),
        }
    }

    #[test]
    fn test_merge_trees_conflict_reports_paths() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let base = write_tree(&repo, &[("a.txt", "base\n")]);
        let ours = write_tree(&repo, &[("a.txt", "ours\n")]);
        let theirs = write_tree(&repo, &[("a.txt", "theirs\n")]);

        let base = repo.find_tree(base).unwrap();
        let ours = repo.find_tree(ours).unwrap();
        let theirs = repo.find_tree(theirs).unwrap();

        match store.merge_trees(&base, &ours, &theirs).unwrap() {
            MergeOutcome::Conflicts(paths) => assert_eq!(paths, vec!["a.txt".to_string()]),
            MergeOutcome::Clean(_) => panic!("expected conflicts"),
        }
    }

    #[test]
    fn test_signed_commit_round_trip() {
        let (_tmp, repo) = init_repo();
        let store = ObjectStore::new(&repo);

        let tree_id = write_tree(&repo, &[("a.txt", "content\n")]);
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();

        let buffer = store
            .commit_buffer(&sig, &sig, "signed commit", &tree, &[])
            .unwrap();
        let oid = store
            .write_signed_commit(&buffer, "-----FAKE SIGNATURE-----")
            .unwrap();

        let (stored_sig, payload) = store.extract_signature(oid).unwrap().unwrap();
        assert_eq!(stored_sig, "-----FAKE SIGNATURE-----");
        assert_eq!(payload, buffer);

        let unsigned = commit_tree(&repo, tree_id, &[], "unsigned");
        assert!(store.extract_signature(unsigned).unwrap().is_none());
    }
}
