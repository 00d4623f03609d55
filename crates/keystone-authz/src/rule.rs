//! Policy rule data model.

use crate::matcher::Matcher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome a permission rule contributes when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Grants access unless a deny also matches.
    Allow,
    /// Denies access regardless of grants.
    Deny,
}

impl Effect {
    /// Returns the lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant or deny over (subject, object, action) patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Matches the subject id or one of its roles.
    pub subject: Matcher,
    /// Matches the object (operation name or HTTP path).
    pub object: Matcher,
    /// Matches the action (`CALL` or an HTTP method).
    pub action: Matcher,
    /// What a match contributes.
    pub effect: Effect,
}

impl Permission {
    /// Returns true if object and action both match.
    pub fn covers(&self, object: &str, action: &str) -> bool {
        self.object.matches(object) && self.action.matches(action)
    }
}

/// A single stored policy rule.
///
/// ```
/// use keystone_authz::PolicyRule;
///
/// let rule: PolicyRule = serde_json::from_str(
///     r#"{"type":"role-assignment","member":"user-1","role":"role:user"}"#,
/// ).unwrap();
/// assert_eq!(rule, PolicyRule::assign("user-1", "role:user"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PolicyRule {
    /// Grants access to matching requests.
    Grant {
        /// Subject pattern.
        subject: Matcher,
        /// Object pattern.
        object: Matcher,
        /// Action pattern.
        action: Matcher,
    },
    /// Denies access to matching requests.
    Deny {
        /// Subject pattern.
        subject: Matcher,
        /// Object pattern.
        object: Matcher,
        /// Action pattern.
        action: Matcher,
    },
    /// Makes `member` inherit every rule granted or denied to `role`.
    RoleAssignment {
        /// User id or role that gains the role.
        member: String,
        /// Role being assigned.
        role: String,
    },
}

impl PolicyRule {
    /// Creates a grant rule.
    pub fn grant(
        subject: impl Into<Matcher>,
        object: impl Into<Matcher>,
        action: impl Into<Matcher>,
    ) -> Self {
        Self::Grant {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Creates a deny rule.
    pub fn deny(
        subject: impl Into<Matcher>,
        object: impl Into<Matcher>,
        action: impl Into<Matcher>,
    ) -> Self {
        Self::Deny {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Creates a role assignment.
    pub fn assign(member: impl Into<String>, role: impl Into<String>) -> Self {
        Self::RoleAssignment {
            member: member.into(),
            role: role.into(),
        }
    }

    /// Returns the permission this rule expresses, if it is not a role assignment.
    pub fn permission(&self) -> Option<Permission> {
        let (subject, object, action, effect) = match self {
            Self::Grant {
                subject,
                object,
                action,
            } => (subject, object, action, Effect::Allow),
            Self::Deny {
                subject,
                object,
                action,
            } => (subject, object, action, Effect::Deny),
            Self::RoleAssignment { .. } => return None,
        };
        Some(Permission {
            subject: subject.clone(),
            object: object.clone(),
            action: action.clone(),
            effect,
        })
    }
}
