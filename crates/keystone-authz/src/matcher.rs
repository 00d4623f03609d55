//! Pattern matching for rule subjects, objects and actions.
//!
//! A pattern string is parsed once into a [`Matcher`]:
//!
//! | Pattern | Matcher | Matches |
//! |---------|---------|---------|
//! | `*` | [`Matcher::Any`] | everything |
//! | `/posts` | [`Matcher::Exact`] | `/posts` only |
//! | `/posts/*` | [`Matcher::Prefix`] | anything starting with `/posts/` |
//! | `/users/*/posts` | [`Matcher::Wildcard`] | `*` spans any run of characters |

use serde::{Deserialize, Serialize};
use std::fmt;

/// A compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Matcher {
    /// Matches every value.
    Any,
    /// Matches one value exactly.
    Exact(String),
    /// Matches values that start with the prefix.
    Prefix(String),
    /// Glob with `*` wildcards anywhere in the pattern.
    Wildcard(String),
}

impl Matcher {
    /// Parses a pattern string.
    pub fn parse(pattern: &str) -> Self {
        match pattern.matches('*').count() {
            0 => Self::Exact(pattern.to_string()),
            _ if pattern.chars().all(|c| c == '*') => Self::Any,
            1 if pattern.ends_with('*') => {
                Self::Prefix(pattern.trim_end_matches('*').to_string())
            }
            _ => Self::Wildcard(pattern.to_string()),
        }
    }

    /// Returns true if `value` matches.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Self::Wildcard(pattern) => glob(pattern.as_bytes(), value.as_bytes()),
        }
    }

    /// Returns the pattern text this matcher was parsed from.
    pub fn pattern(&self) -> String {
        match self {
            Self::Any => "*".to_string(),
            Self::Exact(value) | Self::Wildcard(value) => value.clone(),
            Self::Prefix(prefix) => format!("{prefix}*"),
        }
    }
}

impl From<&str> for Matcher {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<String> for Matcher {
    fn from(pattern: String) -> Self {
        Self::parse(&pattern)
    }
}

impl From<Matcher> for String {
    fn from(matcher: Matcher) -> Self {
        matcher.pattern()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern())
    }
}

/// Greedy glob match with single-star backtracking.
fn glob(pattern: &[u8], value: &[u8]) -> bool {
    let (mut p, mut v) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(&c) if c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    v = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(Matcher::parse("*"), Matcher::Any);
        assert_eq!(Matcher::parse("CALL"), Matcher::Exact("CALL".to_string()));
        assert_eq!(
            Matcher::parse("/posts/*"),
            Matcher::Prefix("/posts/".to_string())
        );
        assert_eq!(
            Matcher::parse("/users/*/posts"),
            Matcher::Wildcard("/users/*/posts".to_string())
        );
    }

    #[test]
    fn test_exact() {
        let m = Matcher::parse("/posts");
        assert!(m.matches("/posts"));
        assert!(!m.matches("/posts/1"));
        assert!(!m.matches("/post"));
    }

    #[test]
    fn test_prefix() {
        let m = Matcher::parse("/posts/*");
        assert!(m.matches("/posts/42"));
        assert!(m.matches("/posts/42/comments"));
        assert!(!m.matches("/posts"));
        assert!(!m.matches("/users/1"));
    }

    #[test]
    fn test_wildcard() {
        let m = Matcher::parse("/users/*/posts");
        assert!(m.matches("/users/7/posts"));
        assert!(m.matches("/users/a/b/posts"));
        assert!(!m.matches("/users/7/comments"));

        let m = Matcher::parse("*.GetUser");
        assert!(m.matches("/v1.UserService.GetUser"));
        assert!(!m.matches("/v1.UserService.GetUsers"));
    }

    #[test]
    fn test_serde_uses_pattern_text() {
        let m: Matcher = serde_json::from_str("\"/posts/*\"").unwrap();
        assert_eq!(m, Matcher::Prefix("/posts/".to_string()));
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"/posts/*\"");
    }

    proptest! {
        #[test]
        fn exact_patterns_match_only_themselves(a in "[a-z/]{0,12}", b in "[a-z/]{0,12}") {
            let m = Matcher::parse(&a);
            prop_assert_eq!(m.matches(&b), a == b);
        }

        #[test]
        fn trailing_star_is_prefix(prefix in "[a-z/]{0,8}", rest in "[a-z/]{0,8}") {
            let value = format!("{prefix}{rest}");
            let pattern = format!("{prefix}*");
            prop_assert!(Matcher::parse(&pattern).matches(&value));
            prop_assert!(glob(pattern.as_bytes(), value.as_bytes()));
        }
    }
}
