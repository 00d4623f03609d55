//! Compiled rule sets and deny-override evaluation.

use crate::config::MAX_ROLE_DEPTH;
use crate::rule::{Effect, Permission, PolicyRule};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A deny rule matched.
    ExplicitDeny,
    /// No grant rule matched.
    NoMatchingGrant,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitDeny => f.write_str("explicit deny"),
            Self::NoMatchingGrant => f.write_str("no matching grant"),
        }
    }
}

/// The outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// At least one grant matched and no deny matched.
    Allow,
    /// The request is denied.
    Deny(DenyReason),
}

impl Decision {
    /// Returns true for [`Decision::Allow`].
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Label used for metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(_) => "deny",
        }
    }
}

/// An immutable, compiled set of policy rules.
///
/// Rule sets are never mutated after construction; the authorizer replaces
/// the whole set on reload.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    permissions: Vec<Permission>,
    roles: HashMap<String, Vec<String>>,
    max_role_depth: usize,
}

impl RuleSet {
    /// Compiles `rules` with the default role depth.
    pub fn new(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self::with_max_role_depth(rules, MAX_ROLE_DEPTH)
    }

    /// Compiles `rules`, following role inheritance at most `max_role_depth` levels.
    pub fn with_max_role_depth(
        rules: impl IntoIterator<Item = PolicyRule>,
        max_role_depth: usize,
    ) -> Self {
        let mut permissions = Vec::new();
        let mut roles: HashMap<String, Vec<String>> = HashMap::new();

        for rule in rules {
            match rule {
                PolicyRule::RoleAssignment { member, role } => {
                    let assigned = roles.entry(member).or_default();
                    if !assigned.contains(&role) {
                        assigned.push(role);
                    }
                }
                other => permissions.extend(other.permission()),
            }
        }

        Self {
            permissions,
            roles,
            max_role_depth,
        }
    }

    /// Returns an empty rule set that denies everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of permission rules.
    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    /// Number of role assignments.
    pub fn assignment_count(&self) -> usize {
        self.roles.values().map(Vec::len).sum()
    }

    /// Returns true if the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.roles.is_empty()
    }

    /// Resolves every role `subject` holds, directly or through inheritance.
    ///
    /// Resolution is breadth-first and stops after `max_role_depth` levels,
    /// so cyclic assignments terminate.
    pub fn roles_of(&self, subject: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::from([subject]);
        let mut resolved = Vec::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(subject, 0)]);

        while let Some((member, depth)) = queue.pop_front() {
            if depth >= self.max_role_depth {
                continue;
            }
            for role in self.roles.get(member).into_iter().flatten() {
                if seen.insert(role.as_str()) {
                    resolved.push(role.clone());
                    queue.push_back((role.as_str(), depth + 1));
                }
            }
        }
        resolved
    }

    /// Evaluates a request with deny-override and default-deny.
    pub fn evaluate(&self, subject: &str, object: &str, action: &str) -> Decision {
        let roles = self.roles_of(subject);
        let mut granted = false;

        let matching = self.permissions.iter().filter(|p| {
            p.covers(object, action)
                && (p.subject.matches(subject) || roles.iter().any(|r| p.subject.matches(r)))
        });
        for permission in matching {
            match permission.effect {
                Effect::Deny => return Decision::Deny(DenyReason::ExplicitDeny),
                Effect::Allow => granted = true,
            }
        }

        if granted {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NoMatchingGrant)
        }
    }
}

impl FromIterator<PolicyRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = PolicyRule>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blog_rules() -> RuleSet {
        RuleSet::new([
            PolicyRule::grant("role:user", "/posts", "CALL"),
            PolicyRule::grant("role:user", "/posts/*", "*"),
            PolicyRule::deny("role:user", "/posts/*", "DELETE"),
            PolicyRule::assign("user-1", "role:user"),
        ])
    }

    #[test]
    fn test_grant_through_role() {
        let rules = blog_rules();
        assert_eq!(rules.evaluate("user-1", "/posts", "CALL"), Decision::Allow);
        assert_eq!(rules.evaluate("user-1", "/posts/42", "GET"), Decision::Allow);
    }

    #[test]
    fn test_deny_overrides_grant() {
        let rules = blog_rules();
        assert_eq!(
            rules.evaluate("user-1", "/posts/42", "DELETE"),
            Decision::Deny(DenyReason::ExplicitDeny)
        );
    }

    #[test]
    fn test_unassigned_subject_is_denied() {
        let rules = blog_rules();
        assert_eq!(
            rules.evaluate("user-2", "/posts", "CALL"),
            Decision::Deny(DenyReason::NoMatchingGrant)
        );
    }

    #[test]
    fn test_direct_subject_rule() {
        let rules = RuleSet::new([PolicyRule::grant("user-9", "*", "*")]);
        assert!(rules.evaluate("user-9", "/anything", "PATCH").is_allowed());
        assert!(!rules.evaluate("user-8", "/anything", "PATCH").is_allowed());
    }

    #[test]
    fn test_transitive_roles() {
        let rules = RuleSet::new([
            PolicyRule::assign("user-1", "role:editor"),
            PolicyRule::assign("role:editor", "role:user"),
            PolicyRule::grant("role:user", "/posts", "CALL"),
        ]);
        assert_eq!(rules.roles_of("user-1"), vec!["role:editor", "role:user"]);
        assert!(rules.evaluate("user-1", "/posts", "CALL").is_allowed());
    }

    #[test]
    fn test_role_depth_is_bounded() {
        let mut rules: Vec<PolicyRule> = (0..15)
            .map(|i| PolicyRule::assign(format!("r{i}"), format!("r{}", i + 1)))
            .collect();
        rules.push(PolicyRule::grant("r15", "/deep", "CALL"));
        rules.push(PolicyRule::grant("r5", "/shallow", "CALL"));
        let rules = RuleSet::new(rules);

        assert_eq!(rules.roles_of("r0").len(), 10);
        assert!(rules.evaluate("r0", "/shallow", "CALL").is_allowed());
        assert!(!rules.evaluate("r0", "/deep", "CALL").is_allowed());
    }

    #[test]
    fn test_cyclic_roles_terminate() {
        let rules = RuleSet::new([
            PolicyRule::assign("a", "b"),
            PolicyRule::assign("b", "a"),
            PolicyRule::grant("b", "/x", "CALL"),
        ]);
        assert_eq!(rules.roles_of("a"), vec!["b"]);
        assert!(rules.evaluate("a", "/x", "CALL").is_allowed());
    }

    #[test]
    fn test_empty_set_denies() {
        assert!(!RuleSet::empty().evaluate("user-1", "/posts", "CALL").is_allowed());
        assert!(RuleSet::empty().is_empty());
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    proptest! {
        #[test]
        fn deny_always_overrides_grant(
            subject in segment(),
            object in segment(),
            action in segment(),
            via_role in any::<bool>(),
        ) {
            let object = format!("/{object}");
            let rule_subject = if via_role { "role:x".to_string() } else { subject.clone() };
            let rules = RuleSet::new([
                PolicyRule::grant(rule_subject.as_str(), object.as_str(), action.as_str()),
                PolicyRule::deny(rule_subject.as_str(), object.as_str(), action.as_str()),
                PolicyRule::assign(subject.as_str(), "role:x"),
            ]);
            prop_assert!(!rules.evaluate(&subject, &object, &action).is_allowed());
        }

        #[test]
        fn unmatched_requests_are_denied(
            subject in segment(),
            object in segment(),
            action in segment(),
        ) {
            // Grants exist, but for a different subject and object.
            let rules = RuleSet::new([
                PolicyRule::grant(format!("other-{subject}"), "/elsewhere", action.as_str()),
                PolicyRule::grant("role:admin", "*", "*"),
            ]);
            prop_assert_eq!(
                rules.evaluate(&subject, &format!("/{object}"), &action),
                Decision::Deny(DenyReason::NoMatchingGrant)
            );
        }
    }
}
