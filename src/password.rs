//! Password strength rule engine.
//!
//! Validation runs in two stages: the confirmation gate (both values present
//! and exactly equal) and then the active strength rule. Rules are pluggable
//! policies behind the `PasswordRule` trait; the character-class rule counts
//! distinct character classes, the entropy rule scores estimated bits of
//! randomness. Both share the identity and reuse checks, and both emit
//! exactly one message per failed check in a stable order so callers can
//! assert on exact text.

use crate::config::{PasswordConfig, PasswordStrength};

/// The user being validated, as the rule engine sees them.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub email: String,
    pub display_name: String,
    /// The user's most recent password digests, newest first. The candidate
    /// is compared in the same representation the caller stores.
    pub recent_passwords: Vec<String>,
}

/// Outcome of a validation run. `messages` holds one entry per failed rule,
/// in rule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordVerdict {
    pub ok: bool,
    pub messages: Vec<String>,
}

impl PasswordVerdict {
    fn pass() -> Self {
        Self {
            ok: true,
            messages: Vec::new(),
        }
    }

    fn fail(messages: Vec<String>) -> Self {
        Self {
            ok: false,
            messages,
        }
    }
}

/// A pluggable strength policy.
pub trait PasswordRule: Send + Sync {
    fn name(&self) -> &str;

    /// One message per failed check, stable order, empty when the password
    /// passes.
    fn evaluate(&self, password: &str, user: &UserInfo) -> Vec<String>;
}

/// Character classes tracked by the class-counting rule.
const CLASS_NAMES: &str = "lowercase letter, uppercase letter, digit, symbol";

fn count_character_classes(password: &str) -> usize {
    let mut lower = false;
    let mut upper = false;
    let mut digit = false;
    let mut symbol = false;
    for c in password.chars() {
        if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else if !c.is_whitespace() {
            symbol = true;
        }
    }
    [lower, upper, digit, symbol].iter().filter(|b| **b).count()
}

fn contains_personal_info(password: &str, user: &UserInfo) -> bool {
    let lowered = password.to_lowercase();
    let email = user.email.trim().to_lowercase();
    if !email.is_empty() && lowered.contains(&email) {
        return true;
    }
    let name = user.display_name.trim().to_lowercase();
    // Very short names would reject almost everything.
    !name.is_empty() && name.len() >= 3 && lowered.contains(&name)
}

fn is_reused(password: &str, user: &UserInfo, depth: usize) -> bool {
    depth > 0
        && user
            .recent_passwords
            .iter()
            .take(depth)
            .any(|previous| previous == password)
}

/// Counts distinct character classes against a configured minimum.
pub struct CharacterClassRule {
    min_length: usize,
    required_classes: usize,
    forbid_personal_info: bool,
    history_depth: usize,
}

impl CharacterClassRule {
    pub fn new(config: &PasswordConfig) -> Self {
        Self {
            min_length: config.min_length,
            required_classes: config.required_character_classes.min(4),
            forbid_personal_info: config.forbid_personal_info,
            history_depth: config.history_depth,
        }
    }
}

impl PasswordRule for CharacterClassRule {
    fn name(&self) -> &str {
        "character-class"
    }

    fn evaluate(&self, password: &str, user: &UserInfo) -> Vec<String> {
        let mut messages = Vec::new();
        if password.chars().count() < self.min_length {
            messages.push(format!(
                "Password must be at least {} characters.",
                self.min_length
            ));
        }
        if count_character_classes(password) < self.required_classes {
            messages.push(format!(
                "Password must contain at least {} of: {}.",
                self.required_classes, CLASS_NAMES
            ));
        }
        if self.forbid_personal_info && contains_personal_info(password, user) {
            messages.push("Password must not contain your email address or name.".to_string());
        }
        if is_reused(password, user, self.history_depth) {
            messages.push(format!(
                "Password must not match one of your previous {} passwords.",
                self.history_depth
            ));
        }
        messages
    }
}

/// Scores estimated bits of randomness against a threshold.
///
/// The estimate is character-pool size to the power of an effective length:
/// repeated characters count at half weight, so "aaaaaaaa" scores far below
/// eight distinct characters.
pub struct EntropyRule {
    min_bits: f64,
    forbid_personal_info: bool,
    history_depth: usize,
}

impl EntropyRule {
    pub fn new(config: &PasswordConfig) -> Self {
        Self {
            min_bits: config.min_entropy_bits,
            forbid_personal_info: config.forbid_personal_info,
            history_depth: config.history_depth,
        }
    }

    /// Estimated entropy in bits.
    pub fn estimate_bits(password: &str) -> f64 {
        if password.is_empty() {
            return 0.0;
        }
        let mut pool = 0usize;
        let mut lower = false;
        let mut upper = false;
        let mut digit = false;
        let mut symbol = false;
        for c in password.chars() {
            if c.is_ascii_lowercase() {
                lower = true;
            } else if c.is_ascii_uppercase() {
                upper = true;
            } else if c.is_ascii_digit() {
                digit = true;
            } else {
                symbol = true;
            }
        }
        if lower {
            pool += 26;
        }
        if upper {
            pool += 26;
        }
        if digit {
            pool += 10;
        }
        if symbol {
            pool += 32;
        }

        let length = password.chars().count();
        let distinct = password
            .chars()
            .collect::<std::collections::HashSet<char>>()
            .len();
        let effective_length = distinct as f64 + (length - distinct) as f64 * 0.5;
        effective_length * (pool as f64).log2()
    }
}

impl PasswordRule for EntropyRule {
    fn name(&self) -> &str {
        "entropy"
    }

    fn evaluate(&self, password: &str, user: &UserInfo) -> Vec<String> {
        let mut messages = Vec::new();
        if Self::estimate_bits(password) < self.min_bits {
            messages.push(
                "Password is not complex enough; use a longer password with more variety."
                    .to_string(),
            );
        }
        if self.forbid_personal_info && contains_personal_info(password, user) {
            messages.push("Password must not contain your email address or name.".to_string());
        }
        if is_reused(password, user, self.history_depth) {
            messages.push(format!(
                "Password must not match one of your previous {} passwords.",
                self.history_depth
            ));
        }
        messages
    }
}

/// Runs the confirmation gate and the configured strength rule.
pub struct PasswordValidator {
    rule: Box<dyn PasswordRule>,
}

impl PasswordValidator {
    pub fn from_config(config: &PasswordConfig) -> Self {
        let rule: Box<dyn PasswordRule> = match config.strength {
            PasswordStrength::CharacterClass => Box::new(CharacterClassRule::new(config)),
            PasswordStrength::Entropy => Box::new(EntropyRule::new(config)),
        };
        Self { rule }
    }

    pub fn rule_name(&self) -> &str {
        self.rule.name()
    }

    /// Validate a password and its confirmation for `user`.
    ///
    /// The confirmation gate runs first: both values must be non-blank and
    /// exactly equal before any strength rule is consulted.
    pub fn validate(&self, password: &str, confirm: &str, user: &UserInfo) -> PasswordVerdict {
        if password.trim().is_empty() || confirm.trim().is_empty() {
            return PasswordVerdict::fail(vec![
                "Password and confirmation must not be blank.".to_string()
            ]);
        }
        if password != confirm {
            return PasswordVerdict::fail(vec![
                "Password and confirmation do not match.".to_string()
            ]);
        }

        let messages = self.rule.evaluate(password, user);
        if messages.is_empty() {
            PasswordVerdict::pass()
        } else {
            PasswordVerdict::fail(messages)
        }
    }
}
