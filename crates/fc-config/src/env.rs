//! Environment-variable loading helpers: `env_or` / `env_or_parse` /
//! `env_required`, used to assemble the startup config.

use std::collections::HashMap;
use std::str::FromStr;

use crate::ConfigError;

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingRequired(key.to_string()))
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// Comma-separated list, trimmed and with empty entries dropped.
pub fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Comma-separated `key=value` pairs, e.g. `R1=Seoul,R2=Busan`.
pub fn env_map(key: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(raw) = std::env::var(key) {
        for pair in raw.split(',') {
            if let Some((k, v)) = pair.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    map
}
