//! Expansion of a group repository into its concrete members
//!
//! Depth-first over declared members with an explicit stack, so nested groups
//! contribute their members in place and declaration order is preserved.

use depot_core::{Configuration, Repository, RepositoryKey};
use indexmap::IndexMap;
use std::collections::HashSet;

use crate::error::RepoError;

/// Result of expanding a group
#[derive(Debug, Clone, Default)]
pub struct CollectedRepositories {
    /// Concrete repositories in traversal order, without duplicates
    pub repositories: Vec<Repository>,
    /// Member references that name no configured repository
    pub dangling: Vec<String>,
}

impl CollectedRepositories {
    pub fn keys(&self) -> Vec<RepositoryKey> {
        self.repositories.iter().map(Repository::key).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }
}

struct Frame<'a> {
    key: RepositoryKey,
    storage_id: &'a str,
    members: &'a [String],
    next: usize,
}

impl<'a> Frame<'a> {
    fn new(group: &'a Repository) -> Self {
        Self {
            key: group.key(),
            storage_id: &group.storage_id,
            members: &group.group_repositories,
            next: 0,
        }
    }
}

pub struct GroupRepositorySetCollector<'a> {
    config: &'a Configuration,
}

impl<'a> GroupRepositorySetCollector<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    /// Concrete (non-group) in-service members of `group`, optionally led by
    /// the group itself
    pub fn collect(&self, group: &Repository, include_self: bool) -> CollectedRepositories {
        let mut found: IndexMap<RepositoryKey, &Repository> = IndexMap::new();
        let mut dangling = Vec::new();

        if include_self {
            found.insert(group.key(), group);
        }

        let mut on_path: HashSet<RepositoryKey> = HashSet::from([group.key()]);
        let mut stack = vec![Frame::new(group)];

        while let Some(frame) = stack.last_mut() {
            let members = frame.members;
            let Some(reference) = members.get(frame.next) else {
                if let Some(done) = stack.pop() {
                    on_path.remove(&done.key);
                }
                continue;
            };
            frame.next += 1;

            let key = match RepositoryKey::parse_member(reference, frame.storage_id) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!("Skipping member of {}: {}", frame.key, e);
                    dangling.push(reference.clone());
                    continue;
                }
            };

            let Some(member) = self.config.repository_by_key(&key) else {
                let inconsistency = RepoError::ConfigurationInconsistency {
                    message: format!("{} references missing repository {}", frame.key, key),
                };
                tracing::warn!("{}", inconsistency);
                dangling.push(key.to_string());
                continue;
            };

            if !member.in_service {
                tracing::debug!("Skipping out-of-service member {}", key);
                continue;
            }

            if member.is_group() {
                if on_path.contains(&key) {
                    tracing::warn!("Group cycle at {} via {}, skipping", key, frame.key);
                    continue;
                }
                on_path.insert(key);
                stack.push(Frame::new(member));
            } else {
                found.entry(key).or_insert(member);
            }
        }

        CollectedRepositories {
            repositories: found.into_values().cloned().collect(),
            dangling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Configuration {
        let mut config: Configuration = serde_yaml::from_str(yaml).unwrap();
        config.link();
        config
    }

    fn ids(collected: &CollectedRepositories) -> Vec<String> {
        collected.keys().iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_nested_groups_preserve_order() {
        let config = config(
            r#"
storages:
  storage0:
    repositories:
      a: {}
      b: {}
      c: {}
      inner:
        type: group
        groupRepositories: [b, "storage1:d"]
      outer:
        type: group
        groupRepositories: [a, inner, c, b]
  storage1:
    repositories:
      d: {}
"#,
        );
        let outer = config.repository("storage0", "outer").unwrap();
        let collector = GroupRepositorySetCollector::new(&config);

        let collected = collector.collect(outer, false);
        assert_eq!(
            ids(&collected),
            vec!["storage0:a", "storage0:b", "storage1:d", "storage0:c"]
        );

        let with_self = collector.collect(outer, true);
        assert_eq!(ids(&with_self)[0], "storage0:outer");
        assert_eq!(with_self.len(), 5);
    }

    #[test]
    fn test_skips_out_of_service_and_dangling() {
        let config = config(
            r#"
storages:
  storage0:
    repositories:
      a:
        inService: false
      b: {}
      group:
        type: group
        groupRepositories: [a, missing, "other:b", b]
"#,
        );
        let group = config.repository("storage0", "group").unwrap();
        let collected = GroupRepositorySetCollector::new(&config).collect(group, false);

        assert_eq!(ids(&collected), vec!["storage0:b"]);
        assert_eq!(collected.dangling, vec!["storage0:missing", "other:b"]);
    }

    #[test]
    fn test_survives_cycles() {
        let config = config(
            r#"
storages:
  storage0:
    repositories:
      h1: {}
      h2: {}
      g1:
        type: group
        groupRepositories: [h1, g2]
      g2:
        type: group
        groupRepositories: [g1, h2, g2]
"#,
        );
        let g1 = config.repository("storage0", "g1").unwrap();
        let collected = GroupRepositorySetCollector::new(&config).collect(g1, false);
        assert_eq!(ids(&collected), vec!["storage0:h1", "storage0:h2"]);

        let g2 = config.repository("storage0", "g2").unwrap();
        let collected = GroupRepositorySetCollector::new(&config).collect(g2, false);
        assert_eq!(ids(&collected), vec!["storage0:h1", "storage0:h2"]);
    }
}
