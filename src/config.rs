use serde::{Deserialize, Serialize};

/// Top-level configuration for the authorization core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    pub cache: CacheConfig,
    pub password: PasswordConfig,
    pub session: SessionKeyConfig,
}

/// Blocking cache configuration shared by the group, membership and policy
/// caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries per cache before LRU eviction.
    pub max_entries: usize,
    /// Entry time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Number of shards per cache; must be non-zero.
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: 300,
            shard_count: 16,
        }
    }
}

/// Which password strength strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordStrength {
    /// Count distinct character classes present.
    CharacterClass,
    /// Score estimated bits of randomness against a threshold.
    Entropy,
}

/// Password rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub strength: PasswordStrength,
    /// Minimum password length.
    pub min_length: usize,
    /// Minimum number of distinct character classes (of lower, upper, digit,
    /// symbol) that must be present. Only used by the character-class rule.
    pub required_character_classes: usize,
    /// Reject passwords that contain the user's email or display name.
    pub forbid_personal_info: bool,
    /// How many of the user's most recent passwords may not be reused.
    /// Zero disables the reuse check.
    pub history_depth: usize,
    /// Required estimated entropy in bits. Only used by the entropy rule.
    pub min_entropy_bits: f64,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            strength: PasswordStrength::CharacterClass,
            min_length: 8,
            required_character_classes: 3,
            forbid_personal_info: true,
            history_depth: 10,
            min_entropy_bits: 60.0,
        }
    }
}

/// Session key store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyConfig {
    /// Prefix for API keys resolved back to a session.
    pub api_key_prefix: String,
    /// Prefix for single-use keys resolved back to a user.
    pub transform_key_prefix: String,
}

impl Default for SessionKeyConfig {
    fn default() -> Self {
        Self {
            api_key_prefix: "apikey".to_string(),
            transform_key_prefix: "transform".to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SecurityConfig = toml::from_str(&content)
            .map_err(|e| crate::error::AuthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.cache.max_entries == 0 {
            return Err(crate::error::AuthError::InvalidConfig(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.cache.shard_count == 0 {
            return Err(crate::error::AuthError::InvalidConfig(
                "cache.shard_count must be greater than 0".to_string(),
            ));
        }
        if self.password.min_length == 0 {
            return Err(crate::error::AuthError::InvalidConfig(
                "password.min_length must be greater than 0".to_string(),
            ));
        }
        if self.password.required_character_classes > 4 {
            return Err(crate::error::AuthError::InvalidConfig(
                "password.required_character_classes cannot exceed 4".to_string(),
            ));
        }
        if self.session.api_key_prefix.is_empty() || self.session.transform_key_prefix.is_empty() {
            return Err(crate::error::AuthError::InvalidConfig(
                "session key prefixes cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
