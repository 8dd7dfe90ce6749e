//! Service configuration
//!
//! Everything the normalizer and dispatcher need is read once at startup
//! into a [`ServiceConfig`] and handed to them explicitly.

use crate::dispatch::ModelSpec;
use crate::groq::{ApiKey, GroqConfig};
use core_pipeline::PixelCeiling;
use std::str::FromStr;
use thiserror::Error;

pub const API_KEY_VAR: &str = "GROQ_API_KEY";
pub const API_URL_VAR: &str = "GROQ_API_URL";
pub const PIXEL_CEILING_VAR: &str = "PIXEL_CEILING";
pub const TIMEOUT_VAR: &str = "REQUEST_TIMEOUT_SECS";
pub const MAX_TOKENS_VAR: &str = "MAX_TOKENS";
pub const TEMPERATURE_VAR: &str = "TEMPERATURE";

/// Configuration that prevents the process from starting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set in the environment or .env file")]
    MissingCredential(&'static str),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Configuration shared by every entry point
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub groq: GroqConfig,
    pub pixel_ceiling: PixelCeiling,
    pub models: Vec<ModelSpec>,
}

impl ServiceConfig {
    /// Defaults for everything except the credential
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            groq: GroqConfig::new(api_key),
            pixel_ceiling: PixelCeiling::DEFAULT,
            models: ModelSpec::defaults(),
        }
    }

    /// Read configuration from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_VAR)
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;

        let mut config = Self::new(ApiKey::new(api_key.trim()));

        if let Some(url) = lookup(API_URL_VAR).filter(|url| !url.trim().is_empty()) {
            config.groq.api_url = url.trim().to_string();
        }

        if let Some(pixels) = parse_var::<u64, _>(&lookup, PIXEL_CEILING_VAR)? {
            config.pixel_ceiling = PixelCeiling::new(pixels).ok_or(ConfigError::Invalid {
                var: PIXEL_CEILING_VAR,
                value: pixels.to_string(),
            })?;
        }

        if let Some(timeout) = parse_var::<u64, _>(&lookup, TIMEOUT_VAR)? {
            if timeout == 0 {
                return Err(ConfigError::Invalid {
                    var: TIMEOUT_VAR,
                    value: timeout.to_string(),
                });
            }
            config.groq.timeout_secs = timeout;
        }

        if let Some(max_tokens) = parse_var(&lookup, MAX_TOKENS_VAR)? {
            config.groq.max_tokens = max_tokens;
        }

        config.groq.temperature = parse_var(&lookup, TEMPERATURE_VAR)?;

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
