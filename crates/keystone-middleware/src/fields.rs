//! Field validation helpers for request validators.
//!
//! Each helper returns a `ValidationFailure` error with a message naming the
//! broken rule, so validators can forward it unchanged.

use keystone_core::{Error, KeystoneResult};
use regex::Regex;
use std::sync::LazyLock;

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,20}$").expect("valid regex"));
static LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]").expect("valid regex"));
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").expect("valid regex"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid regex")
});
static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^1[3-9]\d{9}$").expect("valid regex"));

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// 3 to 20 characters, each a letter, digit or underscore.
pub fn validate_username(username: &str) -> KeystoneResult<()> {
    if USERNAME.is_match(username) {
        Ok(())
    } else {
        Err(Error::validation(
            "username must be 3-20 characters of letters, digits and underscores",
        ))
    }
}

/// At least six characters with at least one letter and one digit.
pub fn validate_password(password: &str) -> KeystoneResult<()> {
    if password.is_empty() {
        return Err(Error::validation("password cannot be empty"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(
            "password must be at least 6 characters long",
        ));
    }
    if !LETTER.is_match(password) {
        return Err(Error::validation(
            "password must contain at least one letter",
        ));
    }
    if !DIGIT.is_match(password) {
        return Err(Error::validation(
            "password must contain at least one number",
        ));
    }
    Ok(())
}

/// A plain `local@domain.tld` address.
pub fn validate_email(email: &str) -> KeystoneResult<()> {
    if email.is_empty() {
        return Err(Error::validation("email cannot be empty"));
    }
    if !EMAIL.is_match(email) {
        return Err(Error::validation("invalid email format"));
    }
    Ok(())
}

/// An 11-digit mobile number starting with 13 to 19.
pub fn validate_phone(phone: &str) -> KeystoneResult<()> {
    if phone.is_empty() {
        return Err(Error::validation("phone cannot be empty"));
    }
    if !PHONE.is_match(phone) {
        return Err(Error::validation("invalid phone format"));
    }
    Ok(())
}
