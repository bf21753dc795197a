use log::LevelFilter;

use crate::error::StoreError;
use crate::logging;

pub const DEFAULT_D1_BINDING: &str = "DB";
pub const DEFAULT_MAX_TAKE: u64 = 1000;

const VAR_D1_BINDING: &str = "STORE_D1_BINDING";
const VAR_DEFAULT_TAKE: &str = "STORE_DEFAULT_TAKE";
const VAR_MAX_TAKE: &str = "STORE_MAX_TAKE";
const VAR_ENFORCE_INVARIANTS: &str = "STORE_ENFORCE_INVARIANTS";
const VAR_LOG_LEVEL: &str = "STORE_LOG_LEVEL";

/// Store settings, read from Worker `vars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Name of the D1 binding in `wrangler.toml`.
    pub d1_binding: String,
    /// Row cap applied to `find_many` calls without `take` (D1 only).
    pub default_take: Option<u64>,
    /// Larger `take` values are clamped to this (D1 only).
    pub max_take: u64,
    /// Check approval pairing, the consent window and score bounds on writes.
    pub enforce_domain_invariants: bool,
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: LevelFilter,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            d1_binding: DEFAULT_D1_BINDING.to_string(),
            default_take: None,
            max_take: DEFAULT_MAX_TAKE,
            enforce_domain_invariants: true,
            log_level: logging::DEFAULT_LEVEL,
        }
    }
}

impl StoreConfig {
    /// Builds a config from a variable lookup; unset variables keep defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Some(binding) = lookup(VAR_D1_BINDING) {
            let binding = binding.trim();
            if binding.is_empty() {
                return Err(invalid(VAR_D1_BINDING, "must not be empty"));
            }
            config.d1_binding = binding.to_string();
        }
        if let Some(raw) = lookup(VAR_DEFAULT_TAKE) {
            config.default_take = Some(parse_count(VAR_DEFAULT_TAKE, &raw)?);
        }
        if let Some(raw) = lookup(VAR_MAX_TAKE) {
            config.max_take = parse_count(VAR_MAX_TAKE, &raw)?;
        }
        if let Some(raw) = lookup(VAR_ENFORCE_INVARIANTS) {
            config.enforce_domain_invariants = parse_flag(VAR_ENFORCE_INVARIANTS, &raw)?;
        }
        if let Some(raw) = lookup(VAR_LOG_LEVEL) {
            config.log_level = raw
                .trim()
                .parse()
                .map_err(|_| invalid(VAR_LOG_LEVEL, "must be a log level"))?;
        }
        if let Some(default_take) = config.default_take {
            if default_take > config.max_take {
                return Err(invalid(VAR_DEFAULT_TAKE, "must not exceed STORE_MAX_TAKE"));
            }
        }
        Ok(config)
    }

    pub fn from_env(env: &worker::Env) -> Result<Self, StoreError> {
        Self::from_vars(|name| env.var(name).ok().map(|v| v.to_string()))
    }

    /// Effective `take` for a D1 read: clamped to `max_take`, defaulted when
    /// absent. Negative takes keep their direction.
    pub fn effective_take(&self, take: Option<i64>) -> Option<i64> {
        let max = i64::try_from(self.max_take).unwrap_or(i64::MAX);
        match take {
            Some(t) => Some(t.clamp(-max, max)),
            None => self
                .default_take
                .map(|d| i64::try_from(d).unwrap_or(i64::MAX)),
        }
    }
}

fn invalid(var: &str, message: &str) -> StoreError {
    StoreError::validation("StoreConfig", format!("{var} {message}"))
}

fn parse_count(var: &str, raw: &str) -> Result<u64, StoreError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(invalid(var, "must be positive")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(var, "must be a positive integer")),
    }
}

fn parse_flag(var: &str, raw: &str) -> Result<bool, StoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, "must be true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = StoreConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.d1_binding, "DB");
        assert!(config.enforce_domain_invariants);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn reads_all_vars() {
        let config = StoreConfig::from_vars(vars(&[
            ("STORE_D1_BINDING", "WORKSPACES"),
            ("STORE_DEFAULT_TAKE", "50"),
            ("STORE_MAX_TAKE", "200"),
            ("STORE_ENFORCE_INVARIANTS", "false"),
            ("STORE_LOG_LEVEL", "Debug"),
        ]))
        .unwrap();
        assert_eq!(config.d1_binding, "WORKSPACES");
        assert_eq!(config.default_take, Some(50));
        assert_eq!(config.max_take, 200);
        assert!(!config.enforce_domain_invariants);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(StoreConfig::from_vars(vars(&[("STORE_MAX_TAKE", "lots")])).is_err());
        assert!(StoreConfig::from_vars(vars(&[("STORE_MAX_TAKE", "0")])).is_err());
        assert!(StoreConfig::from_vars(vars(&[("STORE_ENFORCE_INVARIANTS", "maybe")])).is_err());
        assert!(StoreConfig::from_vars(vars(&[("STORE_D1_BINDING", "  ")])).is_err());
        assert!(StoreConfig::from_vars(vars(&[("STORE_LOG_LEVEL", "chatty")])).is_err());
        assert!(StoreConfig::from_vars(vars(&[
            ("STORE_DEFAULT_TAKE", "500"),
            ("STORE_MAX_TAKE", "100"),
        ]))
        .is_err());
    }

    #[test]
    fn take_is_clamped_both_ways() {
        let config = StoreConfig {
            default_take: Some(25),
            max_take: 100,
            ..StoreConfig::default()
        };
        assert_eq!(config.effective_take(None), Some(25));
        assert_eq!(config.effective_take(Some(500)), Some(100));
        assert_eq!(config.effective_take(Some(-500)), Some(-100));
        assert_eq!(config.effective_take(Some(10)), Some(10));
        assert_eq!(StoreConfig::default().effective_take(None), None);
    }
}
