//! Short, prefixed resource identifiers.
//!
//! Public resource ids look like `user-x3kq9a`: a resource prefix, a dash
//! and six characters derived from a monotonically increasing counter
//! (typically the row's database id). The counter is scrambled with a
//! machine-derived salt so ids do not reveal table sizes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz1234567890";
const CODE_LEN: u32 = 6;
const SPACE: u64 = 36u64.pow(CODE_LEN);
// Coprime with 36, so multiplication is a bijection modulo SPACE.
const MULTIPLIER: u64 = 1_000_003;

/// Generates prefixed resource identifiers.
///
/// Distinct counters below `36^6` always map to distinct ids for the same
/// generator.
///
/// # Example
///
/// ```
/// use keystone_core::ResourceIdGenerator;
///
/// let users = ResourceIdGenerator::with_salt("user", 7);
/// let id = users.generate(1);
/// assert!(id.starts_with("user-"));
/// assert_eq!(id.len(), "user-".len() + 6);
/// ```
#[derive(Debug, Clone)]
pub struct ResourceIdGenerator {
    prefix: String,
    salt: u64,
}

impl ResourceIdGenerator {
    /// Creates a generator salted with this machine's identity.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_salt(prefix, machine_salt())
    }

    /// Creates a generator with an explicit salt.
    #[must_use]
    pub fn with_salt(prefix: impl Into<String>, salt: u64) -> Self {
        Self {
            prefix: prefix.into(),
            salt,
        }
    }

    /// Returns the resource prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the id for `counter`.
    #[must_use]
    pub fn generate(&self, counter: u64) -> String {
        let scrambled = (u128::from(counter % SPACE) * u128::from(MULTIPLIER)
            + u128::from(self.salt % SPACE))
            % u128::from(SPACE);
        let mut value = scrambled as u64;

        let mut code = [0u8; CODE_LEN as usize];
        for slot in code.iter_mut().rev() {
            *slot = ALPHABET[(value % 36) as usize];
            value /= 36;
        }

        let mut id = String::with_capacity(self.prefix.len() + 1 + code.len());
        id.push_str(&self.prefix);
        id.push('-');
        id.extend(code.iter().map(|b| char::from(*b)));
        id
    }
}

/// Derives a salt from the machine id, falling back to the hostname and
/// then to random bytes.
fn machine_salt() -> u64 {
    let source = ["/etc/machine-id", "/sys/class/dmi/id/product_uuid", "/etc/hostname"]
        .iter()
        .find_map(|path| {
            std::fs::read_to_string(path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}
