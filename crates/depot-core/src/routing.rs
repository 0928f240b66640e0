//! Routing rules for group repositories
//!
//! Rules are keyed by group repository id, with `*` holding the wildcard rule
//! sets that apply to every group:
//!
//! ```yaml
//! routingRules:
//!   denied:
//!     group-releases:
//!       - pattern: ".*(com|org)/artifacts.in.releases.*"
//!         repositories: [releases]
//!   accepted:
//!     "*":
//!       - pattern: ".*foo.*"
//!         repositories: [releases]
//! ```

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};
use crate::repository::RepositoryKey;

/// Group id under which wildcard rule sets are stored
pub const WILDCARD: &str = "*";

/// Compiled path pattern, matched against the full relative path
#[derive(Debug, Clone)]
pub struct RoutingPattern {
    source: String,
    regex: Regex,
}

impl RoutingPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let source = pattern.into();
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| {
            CoreError::InvalidPattern {
                pattern: source.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { source, regex })
    }

    /// Full-string match
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for RoutingPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for RoutingPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for RoutingPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        RoutingPattern::new(source).map_err(serde::de::Error::custom)
    }
}

/// A pattern plus the member repositories it targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub pattern: RoutingPattern,

    /// Target repositories, as `repositoryId` or `storageId:repositoryId`
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl RoutingRule {
    pub fn new<I, S>(pattern: &str, repositories: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            pattern: RoutingPattern::new(pattern)?,
            repositories: repositories.into_iter().map(Into::into).collect(),
        })
    }

    /// Whether the rule targets the given repository
    pub fn targets(&self, repository: &RepositoryKey) -> bool {
        self.repositories.iter().any(|target| match target.split_once(':') {
            Some((storage, id)) => {
                storage == repository.storage_id && id == repository.repository_id
            }
            None => target == &repository.repository_id,
        })
    }

    /// A rule fits when it targets the repository and matches the path
    pub fn fits(&self, repository: &RepositoryKey, path: &str) -> bool {
        self.targets(repository) && self.pattern.matches(path)
    }
}

/// Ordered list of routing rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: Vec<RoutingRule>,
}

impl RuleSet {
    /// Whether any rule fits; an empty set never fires
    pub fn fires(&self, repository: &RepositoryKey, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.fits(repository, path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Process-wide routing rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRules {
    /// Accept rule sets by group repository id (`*` = wildcard)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub accepted: IndexMap<String, RuleSet>,

    /// Deny rule sets by group repository id (`*` = wildcard)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub denied: IndexMap<String, RuleSet>,
}

impl RoutingRules {
    pub fn accepted_for(&self, group_repository_id: &str) -> Option<&RuleSet> {
        self.accepted.get(group_repository_id)
    }

    pub fn denied_for(&self, group_repository_id: &str) -> Option<&RuleSet> {
        self.denied.get(group_repository_id)
    }

    pub fn wildcard_accepted(&self) -> Option<&RuleSet> {
        self.accepted.get(WILDCARD)
    }

    pub fn wildcard_denied(&self) -> Option<&RuleSet> {
        self.denied.get(WILDCARD)
    }

    /// Add an accept rule for a group (or `*`)
    pub fn accept(&mut self, group_repository_id: &str, rule: RoutingRule) {
        self.accepted
            .entry(group_repository_id.to_string())
            .or_default()
            .rules
            .push(rule);
    }

    /// Add a deny rule for a group (or `*`)
    pub fn deny(&mut self, group_repository_id: &str, rule: RoutingRule) {
        self.denied
            .entry(group_repository_id.to_string())
            .or_default()
            .rules
            .push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.values().all(RuleSet::is_empty) && self.denied.values().all(RuleSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_full_match() {
        let pattern = RoutingPattern::new(".*foo.*").unwrap();
        assert!(pattern.matches("com/foo/bar/1.0/bar-1.0.jar"));
        assert!(!pattern.matches("com/bar/baz/1.0/baz-1.0.jar"));

        let prefix = RoutingPattern::new("com/").unwrap();
        assert!(!prefix.matches("com/foo"));
        assert!(prefix.matches("com/"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            RoutingPattern::new("(unclosed"),
            Err(CoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_rule_targets() {
        let rule = RoutingRule::new(".*", ["releases", "storage1:snapshots"]).unwrap();
        assert!(rule.targets(&RepositoryKey::new("storage0", "releases")));
        assert!(rule.targets(&RepositoryKey::new("storage1", "snapshots")));
        assert!(!rule.targets(&RepositoryKey::new("storage0", "snapshots")));
    }

    #[test]
    fn test_empty_rule_set_never_fires() {
        let set = RuleSet::default();
        assert!(!set.fires(&RepositoryKey::new("storage0", "releases"), "any/path"));
    }

    #[test]
    fn test_rules_yaml() {
        let yaml = r#"
denied:
  group-releases:
    - pattern: ".*(com|org)/artifacts.in.releases.*"
      repositories: [releases]
  "*":
    - pattern: ".*"
      repositories: [snapshots]
accepted:
  group-releases:
    - pattern: ".*foo.*"
      repositories: [releases]
"#;
        let rules: RoutingRules = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.denied_for("group-releases").unwrap().rules.len(), 1);
        assert_eq!(rules.wildcard_denied().unwrap().rules.len(), 1);
        assert!(rules.wildcard_accepted().is_none());
        assert!(!rules.is_empty());

        let round_trip: RoutingRules =
            serde_yaml::from_str(&serde_yaml::to_string(&rules).unwrap()).unwrap();
        assert_eq!(round_trip, rules);
    }
}
