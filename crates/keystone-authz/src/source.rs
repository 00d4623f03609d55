//! Rule sources the authorizer loads from.
//!
//! The authorizer never writes rules. A [`RuleSource`] returns the complete
//! current rule list on every call and the authorizer swaps it in whole.

use crate::error::{AuthzError, AuthzResult};
use crate::rule::PolicyRule;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Storage the authorizer reloads rules from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Returns every rule currently stored.
    async fn load(&self) -> AuthzResult<Vec<PolicyRule>>;
}

/// An in-memory rule source whose contents can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticRuleSource {
    rules: RwLock<Vec<PolicyRule>>,
}

impl StaticRuleSource {
    /// Creates a source holding `rules`.
    pub fn new(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().collect()),
        }
    }

    /// Replaces every stored rule. Visible on the authorizer's next reload.
    pub fn replace(&self, rules: impl IntoIterator<Item = PolicyRule>) {
        *self.rules.write() = rules.into_iter().collect();
    }

    /// Appends a rule.
    pub fn push(&self, rule: PolicyRule) {
        self.rules.write().push(rule);
    }

    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rules are stored.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self) -> AuthzResult<Vec<PolicyRule>> {
        Ok(self.rules.read().clone())
    }
}

/// One row of a `casbin_rule`-shaped table.
///
/// `ptype = "p"` rows are permissions `(subject, object, action[, effect])`;
/// `ptype = "g"` rows are role assignments `(member, role)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct RuleRow {
    /// Rule kind.
    pub ptype: String,
    /// First value.
    pub v0: Option<String>,
    /// Second value.
    pub v1: Option<String>,
    /// Third value.
    pub v2: Option<String>,
    /// Fourth value.
    pub v3: Option<String>,
}

impl TryFrom<RuleRow> for PolicyRule {
    type Error = AuthzError;

    fn try_from(row: RuleRow) -> AuthzResult<Self> {
        let field = |value: Option<String>, name: &str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthzError::InvalidRule(format!("{} row missing {name}", row.ptype)))
        };

        match row.ptype.as_str() {
            "p" => {
                let subject = field(row.v0.clone(), "subject")?;
                let object = field(row.v1.clone(), "object")?;
                let action = field(row.v2.clone(), "action")?;
                match row.v3.as_deref().unwrap_or("allow") {
                    "" | "allow" => Ok(Self::grant(subject, object, action)),
                    "deny" => Ok(Self::deny(subject, object, action)),
                    other => Err(AuthzError::InvalidRule(format!("unknown effect '{other}'"))),
                }
            }
            "g" => {
                let member = field(row.v0.clone(), "member")?;
                let role = field(row.v1.clone(), "role")?;
                Ok(Self::assign(member, role))
            }
            other => Err(AuthzError::InvalidRule(format!("unknown rule type '{other}'"))),
        }
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::PgRuleSource;

#[cfg(feature = "postgres")]
mod postgres {
    use super::{RuleRow, RuleSource};
    use crate::error::{AuthzError, AuthzResult};
    use crate::rule::PolicyRule;
    use async_trait::async_trait;
    use sqlx::PgPool;
    use tracing::warn;

    /// Default rule table name.
    pub const DEFAULT_TABLE: &str = "casbin_rule";

    /// Loads rules from a PostgreSQL table with columns `ptype, v0, v1, v2, v3`.
    ///
    /// Rows that do not describe a valid rule are skipped with a warning so
    /// one bad row never empties the whole rule set.
    #[derive(Debug, Clone)]
    pub struct PgRuleSource {
        pool: PgPool,
        query: String,
    }

    impl PgRuleSource {
        /// Reads from the default `casbin_rule` table.
        pub fn new(pool: PgPool) -> Self {
            Self {
                pool,
                query: select_statement(DEFAULT_TABLE),
            }
        }

        /// Reads from `table` instead.
        pub fn with_table(mut self, table: &str) -> AuthzResult<Self> {
            let valid = !table.is_empty()
                && table
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(AuthzError::Config(format!("invalid rule table '{table}'")));
            }
            self.query = select_statement(table);
            Ok(self)
        }
    }

    fn select_statement(table: &str) -> String {
        format!("SELECT ptype, v0, v1, v2, v3 FROM {table} ORDER BY id")
    }

    #[async_trait]
    impl RuleSource for PgRuleSource {
        fn name(&self) -> &str {
            "postgres"
        }

        async fn load(&self) -> AuthzResult<Vec<PolicyRule>> {
            let rows = sqlx::query_as::<_, RuleRow>(&self.query)
                .fetch_all(&self.pool)
                .await?;

            let mut rules = Vec::with_capacity(rows.len());
            for row in rows {
                match PolicyRule::try_from(row) {
                    Ok(rule) => rules.push(rule),
                    Err(err) => warn!(error = %err, "skipping stored rule"),
                }
            }
            Ok(rules)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ptype: &str, values: [&str; 4]) -> RuleRow {
        let opt = |v: &str| (!v.is_empty()).then(|| v.to_string());
        RuleRow {
            ptype: ptype.to_string(),
            v0: opt(values[0]),
            v1: opt(values[1]),
            v2: opt(values[2]),
            v3: opt(values[3]),
        }
    }

    #[test]
    fn test_permission_rows() {
        let grant = PolicyRule::try_from(row("p", ["role:user", "/posts", "CALL", ""])).unwrap();
        assert_eq!(grant, PolicyRule::grant("role:user", "/posts", "CALL"));

        let deny =
            PolicyRule::try_from(row("p", ["role:user", "/posts/*", "DELETE", "deny"])).unwrap();
        assert_eq!(deny, PolicyRule::deny("role:user", "/posts/*", "DELETE"));
    }

    #[test]
    fn test_role_rows() {
        let rule = PolicyRule::try_from(row("g", ["user-1", "role:user", "", ""])).unwrap();
        assert_eq!(rule, PolicyRule::assign("user-1", "role:user"));
    }

    #[test]
    fn test_invalid_rows() {
        assert!(PolicyRule::try_from(row("p", ["role:user", "", "CALL", ""])).is_err());
        assert!(PolicyRule::try_from(row("p", ["a", "b", "c", "maybe"])).is_err());
        assert!(PolicyRule::try_from(row("x", ["a", "b", "", ""])).is_err());
    }

    #[tokio::test]
    async fn test_static_source_replace() {
        let source = StaticRuleSource::new([PolicyRule::assign("user-1", "role:user")]);
        assert_eq!(source.load().await.unwrap().len(), 1);

        source.replace(Vec::new());
        assert!(source.is_empty());

        source.push(PolicyRule::grant("*", "/health", "CALL"));
        assert_eq!(source.len(), 1);
        assert_eq!(source.name(), "static");
    }
}
