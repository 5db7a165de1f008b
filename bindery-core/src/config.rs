// Limits for body decoding, loaded from TOML or the environment

use crate::form::DEFAULT_MAX_MULTIPART_MEMORY;
use serde::Deserialize;
use thiserror::Error;

/// Default cap on `application/x-www-form-urlencoded` bodies (10 MiB).
pub const DEFAULT_MAX_FORM_BODY: u64 = 10 << 20;

/// Environment variable prefix read by [`BindConfig::from_env`].
pub const ENV_PREFIX: &str = "BINDERY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Decoding limits applied by a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Bytes of file data kept in memory per multipart body before spilling
    /// to a temporary file.
    pub max_multipart_memory: u64,

    /// Largest urlencoded body accepted.
    pub max_form_body: u64,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            max_multipart_memory: DEFAULT_MAX_MULTIPART_MEMORY,
            max_form_body: DEFAULT_MAX_FORM_BODY,
        }
    }
}

impl BindConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```
    /// use bindery_core::BindConfig;
    ///
    /// let config = BindConfig::from_toml_str("max_form_body = 1024").unwrap();
    /// assert_eq!(config.max_form_body, 1024);
    /// assert_eq!(config.max_multipart_memory, 32 << 20);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `BINDERY_MAX_MULTIPART_MEMORY` and `BINDERY_MAX_FORM_BODY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = read_bytes(&lookup, "MAX_MULTIPART_MEMORY")? {
            config.max_multipart_memory = value;
        }
        if let Some(value) = read_bytes(&lookup, "MAX_FORM_BODY")? {
            config.max_form_body = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_form_body == 0 {
            return Err(ConfigError::ValidationError(
                "max_form_body must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_bytes<F>(lookup: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{}_{}", ENV_PREFIX, name);
    match lookup(key.as_str()) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
