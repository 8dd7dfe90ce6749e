//! HTTP server configuration

use axum::http::HeaderValue;
use llm_bridge::ConfigError;
use std::net::SocketAddr;

pub const BIND_ADDR_VAR: &str = "BIND_ADDR";
pub const CORS_ORIGINS_VAR: &str = "CORS_ORIGINS";
pub const MAX_UPLOAD_BYTES_VAR: &str = "MAX_UPLOAD_BYTES";

/// Largest multipart body accepted by default (64 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8000)
    pub bind_addr: SocketAddr,
    /// Origins allowed by CORS (default: http://localhost:3000)
    pub cors_origins: Vec<HeaderValue>,
    /// Upload size limit in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors_origins: vec![HeaderValue::from_static("http://localhost:3000")],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = non_blank(lookup(BIND_ADDR_VAR)) {
            config.bind_addr = addr.parse().map_err(|_| ConfigError::Invalid {
                var: BIND_ADDR_VAR,
                value: addr.clone(),
            })?;
        }

        if let Some(origins) = non_blank(lookup(CORS_ORIGINS_VAR)) {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| {
                    let invalid = || ConfigError::Invalid {
                        var: CORS_ORIGINS_VAR,
                        value: origin.to_string(),
                    };
                    // credentialed CORS cannot use a wildcard origin
                    if origin == "*" {
                        return Err(invalid());
                    }
                    HeaderValue::from_str(origin).map_err(|_| invalid())
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(limit) = non_blank(lookup(MAX_UPLOAD_BYTES_VAR)) {
            config.max_upload_bytes = limit.parse().map_err(|_| ConfigError::Invalid {
                var: MAX_UPLOAD_BYTES_VAR,
                value: limit.clone(),
            })?;
        }

        Ok(config)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
