//! Login identifier parsing and normalization.
//!
//! Raw login identifiers are rejected or canonicalized here before they reach
//! the rest of the authorization core. The canonical form is trimmed and
//! lowercased so that lookups and password checks are case-insensitive.

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed, normalized email address used as a login identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidEmail {
    address: String,
}

impl ValidEmail {
    /// Parse a raw identifier into canonical form.
    ///
    /// Rejects blank input, embedded whitespace, a missing or misplaced `@`,
    /// and a domain without a dot.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthError::InvalidEmail("address is blank".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AuthError::InvalidEmail(format!(
                "'{trimmed}' contains whitespace"
            )));
        }

        let mut parts = trimmed.splitn(2, '@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();

        if local.is_empty() || domain.is_empty() {
            return Err(AuthError::InvalidEmail(format!(
                "'{trimmed}' is not of the form name@domain"
            )));
        }
        if domain.contains('@') {
            return Err(AuthError::InvalidEmail(format!(
                "'{trimmed}' contains more than one '@'"
            )));
        }
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(AuthError::InvalidEmail(format!(
                "'{trimmed}' has an invalid domain"
            )));
        }

        Ok(Self {
            address: trimmed.to_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    /// The part before the `@`, useful for default display names.
    pub fn local_part(&self) -> &str {
        self.address.split('@').next().unwrap_or(&self.address)
    }
}

impl fmt::Display for ValidEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
