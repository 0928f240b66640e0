//! Routing rule evaluation for group traversal

use depot_core::{RepositoryPath, RoutingRules, RuleSet};

/// Decides whether a group may serve a path from one of its members
pub struct RoutingRuleChecker<'a> {
    rules: &'a RoutingRules,
}

impl<'a> RoutingRuleChecker<'a> {
    pub fn new(rules: &'a RoutingRules) -> Self {
        Self { rules }
    }

    /// A path drawn from a member is denied when a deny rule (group specific
    /// or wildcard) fits it and no accept rule (group specific or wildcard)
    /// overrides the denial.
    pub fn is_denied(&self, group_repository_id: &str, path: &RepositoryPath) -> bool {
        let member = path.key();
        let relative = path.relative();
        let fires = |set: Option<&RuleSet>| set.is_some_and(|set| set.fires(&member, relative));

        let denied = fires(self.rules.denied_for(group_repository_id))
            || fires(self.rules.wildcard_denied());
        if !denied {
            return false;
        }

        let accepted = fires(self.rules.accepted_for(group_repository_id))
            || fires(self.rules.wildcard_accepted());
        !accepted
    }

    pub fn is_accepted(&self, group_repository_id: &str, path: &RepositoryPath) -> bool {
        !self.is_denied(group_repository_id, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{Repository, RoutingRule, WILDCARD};

    fn member_path(repository_id: &str, relative: &str) -> RepositoryPath {
        let mut repo = Repository::hosted(repository_id);
        repo.storage_id = "storage0".to_string();
        RepositoryPath::new(repo, relative).unwrap()
    }

    const DENIED_PATH: &str = "com/artifacts/in/releases/foo/1.0/foo-1.0.jar";

    #[test]
    fn test_no_rules_allows_everything() {
        let rules = RoutingRules::default();
        let checker = RoutingRuleChecker::new(&rules);
        assert!(checker.is_accepted("group-releases", &member_path("releases", DENIED_PATH)));
    }

    #[test]
    fn test_group_deny_applies_to_targeted_member_only() {
        let mut rules = RoutingRules::default();
        rules.deny(
            "group-releases",
            RoutingRule::new(".*(com|org)/artifacts.in.releases.*", ["releases"]).unwrap(),
        );
        let checker = RoutingRuleChecker::new(&rules);

        assert!(checker.is_denied("group-releases", &member_path("releases", DENIED_PATH)));
        assert!(checker.is_accepted("group-releases", &member_path("releases-with-trash", DENIED_PATH)));
        assert!(checker.is_accepted("other-group", &member_path("releases", DENIED_PATH)));
        assert!(checker.is_accepted(
            "group-releases",
            &member_path("releases", "org/foo/bar/1.0/bar-1.0.jar")
        ));
    }

    #[test]
    fn test_accept_overrides_deny() {
        let mut rules = RoutingRules::default();
        rules.deny("group-releases", RoutingRule::new(".*", ["releases"]).unwrap());
        rules.accept("group-releases", RoutingRule::new(".*foo.*", ["releases"]).unwrap());
        let checker = RoutingRuleChecker::new(&rules);

        assert!(checker.is_accepted("group-releases", &member_path("releases", DENIED_PATH)));
        assert!(checker.is_denied(
            "group-releases",
            &member_path("releases", "org/bar/baz/1.0/baz-1.0.jar")
        ));
    }

    #[test]
    fn test_wildcard_rules() {
        let mut rules = RoutingRules::default();
        rules.deny(WILDCARD, RoutingRule::new(".*", ["storage0:snapshots"]).unwrap());
        rules.accept(WILDCARD, RoutingRule::new(".*-SNAPSHOT.*", ["snapshots"]).unwrap());
        let checker = RoutingRuleChecker::new(&rules);

        let release = member_path("snapshots", "org/foo/bar/1.0/bar-1.0.jar");
        assert!(checker.is_denied("any-group", &release));
        assert!(checker.is_denied("group-releases", &release));

        let snapshot = member_path("snapshots", "org/foo/bar/1.0-SNAPSHOT/bar-1.0-SNAPSHOT.jar");
        assert!(checker.is_accepted("any-group", &snapshot));
    }
}
