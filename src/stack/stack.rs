use crate::errors::{Result, UnstackedError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single logical change in a stack.
///
/// The `id` is the durable identity: it survives every rewrite, while
/// `commit_hash` changes each time the change is rebased or amended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Stable identifier, never reused
    pub id: Uuid,
    /// Branch name for this change (short form, without refs/heads/)
    pub branch: String,
    /// Commit hash currently backing this change
    pub commit_hash: String,
    /// Hash this tool last pushed to the remote branch, if any.
    /// A remote still sitting at this hash has not been touched by
    /// anyone else, so force-updating it is safe.
    #[serde(default)]
    pub last_pushed_hash: Option<String>,
    /// Title of the change (first line of the commit message)
    pub title: String,
    /// When this change was created
    pub created_at: DateTime<Utc>,
    /// When this change was last rewritten
    pub updated_at: DateTime<Utc>,
}

impl Change {
    pub fn new(branch: String, commit_hash: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            branch,
            commit_hash,
            last_pushed_hash: None,
            title,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full ref name for this change's branch
    pub fn ref_name(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Short version of the commit hash
    pub fn short_hash(&self) -> String {
        if self.commit_hash.len() >= 8 {
            self.commit_hash[..8].to_string()
        } else {
            self.commit_hash.clone()
        }
    }
}

/// An ordered sequence of dependent changes built on an upstream branch.
///
/// Invariant: each change's commit has exactly one parent, equal to the
/// previous change's commit (or to `base_hash` for the first change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name (also the branch namespace segment)
    pub name: String,
    /// Upstream branch this stack is built on
    pub upstream: String,
    /// Upstream commit the stack was last fully built on
    pub base_hash: String,
    /// Changes in dependency order, bottom first
    pub changes: Vec<Change>,
    /// When this stack was created
    pub created_at: DateTime<Utc>,
    /// When this stack was last updated
    pub updated_at: DateTime<Utc>,
}

impl Stack {
    pub fn new(name: String, upstream: String, base_hash: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            upstream,
            base_hash,
            changes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Bottom (first) change of the stack
    pub fn bottom(&self) -> Option<&Change> {
        self.changes.first()
    }

    /// Top (last) change of the stack
    pub fn top(&self) -> Option<&Change> {
        self.changes.last()
    }

    pub fn get_change(&self, id: &Uuid) -> Option<&Change> {
        self.changes.iter().find(|c| &c.id == id)
    }

    pub fn get_change_mut(&mut self, id: &Uuid) -> Option<&mut Change> {
        self.changes.iter_mut().find(|c| &c.id == id)
    }

    pub fn position(&self, id: &Uuid) -> Option<usize> {
        self.changes.iter().position(|c| &c.id == id)
    }

    /// Find a change by id prefix (for CLI ergonomics). Ambiguous or
    /// unknown prefixes are errors.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<&Change> {
        let prefix = prefix.to_lowercase();
        let matches: Vec<_> = self
            .changes
            .iter()
            .filter(|c| c.id.to_string().starts_with(&prefix))
            .collect();
        match matches.len() {
            0 => Err(UnstackedError::validation(format!(
                "No change with id '{prefix}'"
            ))),
            1 => Ok(matches[0]),
            n => Err(UnstackedError::validation(format!(
                "Change id '{prefix}' is ambiguous ({n} matches)"
            ))),
        }
    }

    /// Append a new change at the top of the stack
    pub fn push_change(&mut self, change: Change) {
        self.changes.push(change);
        self.updated_at = Utc::now();
    }

    /// New ordering with `change` inserted after position `after`
    /// (`None` inserts at the bottom). Pure: stored objects are not
    /// touched; the caller runs a sync pass to realize the new order.
    pub fn insert(&self, change: Change, after: Option<usize>) -> Result<Stack> {
        let index = match after {
            Some(after) if after >= self.changes.len() => {
                return Err(UnstackedError::validation(format!(
                    "Insert position {after} out of bounds for stack of {}",
                    self.changes.len()
                )));
            }
            Some(after) => after + 1,
            None => 0,
        };

        let mut next = self.clone();
        next.changes.insert(index, change);
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// New ordering without the given change. Pure.
    pub fn remove(&self, id: &Uuid) -> Result<Stack> {
        let index = self
            .position(id)
            .ok_or_else(|| UnstackedError::validation(format!("No change with id {id}")))?;

        let mut next = self.clone();
        next.changes.remove(index);
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// New ordering with the given change moved to `new_index`. Pure.
    pub fn reorder(&self, id: &Uuid, new_index: usize) -> Result<Stack> {
        let index = self
            .position(id)
            .ok_or_else(|| UnstackedError::validation(format!("No change with id {id}")))?;

        if new_index >= self.changes.len() {
            return Err(UnstackedError::validation(format!(
                "Index {new_index} out of bounds for stack of {}",
                self.changes.len()
            )));
        }

        let mut next = self.clone();
        let change = next.changes.remove(index);
        next.changes.insert(new_index, change);
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Structural validation: no duplicate identifiers, no duplicate
    /// branch names. The parent-chain invariant is checked against the
    /// repository by the manager, which can see the refs.
    pub fn validate(&self) -> Result<()> {
        for (i, change) in self.changes.iter().enumerate() {
            for other in &self.changes[i + 1..] {
                if change.id == other.id {
                    return Err(UnstackedError::corrupt_stack(
                        change.id,
                        "duplicate change identifier",
                    ));
                }
                if change.branch == other.branch {
                    return Err(UnstackedError::corrupt_stack(
                        other.id,
                        format!("duplicate branch name '{}'", other.branch),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Generate a branch-safe slug from a change title
pub fn slugify_title(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '-',
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");

    if slug.chars().next().is_none_or(|c| !c.is_alphabetic()) {
        format!("change-{slug}")
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stack() -> Stack {
        let mut stack = Stack::new("feature".into(), "main".into(), "0".repeat(40));
        stack.push_change(Change::new("unstacked/feature/a".into(), "a".repeat(40), "A".into()));
        stack.push_change(Change::new("unstacked/feature/b".into(), "b".repeat(40), "B".into()));
        stack.push_change(Change::new("unstacked/feature/c".into(), "c".repeat(40), "C".into()));
        stack
    }

    #[test]
    fn test_push_and_lookup() {
        let stack = sample_stack();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.bottom().unwrap().title, "A");
        assert_eq!(stack.top().unwrap().title, "C");

        let id = stack.changes[1].id;
        assert_eq!(stack.get_change(&id).unwrap().title, "B");
        assert_eq!(stack.position(&id), Some(1));
    }

    #[test]
    fn test_reorder_is_pure() {
        let stack = sample_stack();
        let id = stack.changes[2].id;

        let next = stack.reorder(&id, 0).unwrap();
        assert_eq!(next.changes[0].title, "C");
        assert_eq!(next.changes[1].title, "A");
        // Original ordering untouched
        assert_eq!(stack.changes[0].title, "A");

        assert!(stack.reorder(&id, 3).is_err());
        assert!(stack.reorder(&Uuid::new_v4(), 0).is_err());
    }

    #[test]
    fn test_remove_and_insert() {
        let stack = sample_stack();
        let id = stack.changes[1].id;

        let without = stack.remove(&id).unwrap();
        assert_eq!(without.len(), 2);
        assert!(without.get_change(&id).is_none());

        let change = Change::new("unstacked/feature/d".into(), "d".repeat(40), "D".into());
        let with = stack.insert(change, Some(0)).unwrap();
        assert_eq!(with.changes[1].title, "D");

        let change = Change::new("unstacked/feature/e".into(), "e".repeat(40), "E".into());
        let bottom = stack.insert(change, None).unwrap();
        assert_eq!(bottom.changes[0].title, "E");
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut stack = sample_stack();
        assert!(stack.validate().is_ok());

        let mut dup = stack.changes[0].clone();
        dup.branch = "unstacked/feature/dup".into();
        stack.changes.push(dup);
        assert!(matches!(
            stack.validate(),
            Err(UnstackedError::CorruptStack { .. })
        ));
    }

    #[test]
    fn test_find_by_prefix() {
        let stack = sample_stack();
        let id = stack.changes[0].id.to_string();

        assert_eq!(stack.find_by_prefix(&id[..8]).unwrap().id.to_string(), id);
        assert!(stack.find_by_prefix("zzzzzzzz").is_err());
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Add user authentication"), "add-user-authentication");
        assert_eq!(slugify_title("Fix bug in payment system!!!"), "fix-bug-in-payment-system");
        assert_eq!(slugify_title("123 numeric start"), "change-123-numeric-start");
        assert_eq!(
            slugify_title("one two three four five six seven"),
            "one-two-three-four-five"
        );
    }
}
