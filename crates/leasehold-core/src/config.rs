//! Engine configuration.
//!
//! Options are an immutable value handed to each provider. They can be built
//! in code (starting from [`LockOptions::default`]) or loaded from TOML, where
//! durations are given in milliseconds:
//!
//! ```toml
//! ttl_default_ms = 15000
//! max_attempts = 20
//! base_backoff_ms = 25
//! backoff_cap_ms = 2000
//! jitter_ratio = 0.5
//! acquire_deadline_ms = 60000
//! store_timeout_ms = 3000
//! auto_renew = true
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{LockError, LockResult};

/// Retry behaviour of a blocking acquire.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_cap: Duration,
    /// Relative spread of each delay, in `[0, 1]`.
    pub jitter_ratio: f64,
    /// Used when the caller does not pass a deadline. `None` leaves only `max_attempts`.
    pub acquire_deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(5),
            jitter_ratio: 0.5,
            acquire_deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> LockResult<()> {
        if self.max_attempts == 0 {
            return Err(LockError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(LockError::InvalidConfig(format!(
                "jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        if self.backoff_cap < self.base_backoff {
            return Err(LockError::InvalidConfig(
                "backoff_cap must not be smaller than base_backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options shared by every lock and semaphore a provider creates.
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    /// Lease length used when an operation is given no ttl.
    pub ttl_default: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
    /// Spawn a background renewal task for every held handle.
    pub auto_renew: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl_default: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            store_timeout: Duration::from_secs(5),
            auto_renew: true,
        }
    }
}

impl LockOptions {
    pub fn validate(&self) -> LockResult<()> {
        if self.ttl_default.is_zero() {
            return Err(LockError::InvalidConfig(
                "ttl_default must be positive".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(LockError::InvalidConfig(
                "store_timeout must be positive".to_string(),
            ));
        }
        self.retry.validate()
    }

    /// Parses and validates options from a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> LockResult<Self> {
        let raw: RawLockOptions =
            toml::from_str(source).map_err(|e| LockError::InvalidConfig(e.to_string()))?;
        let options = Self::from(raw);
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLockOptions {
    ttl_default_ms: u64,
    max_attempts: u32,
    base_backoff_ms: u64,
    backoff_cap_ms: u64,
    jitter_ratio: f64,
    acquire_deadline_ms: Option<u64>,
    store_timeout_ms: u64,
    auto_renew: bool,
}

impl Default for RawLockOptions {
    fn default() -> Self {
        let defaults = LockOptions::default();
        Self {
            ttl_default_ms: defaults.ttl_default.as_millis() as u64,
            max_attempts: defaults.retry.max_attempts,
            base_backoff_ms: defaults.retry.base_backoff.as_millis() as u64,
            backoff_cap_ms: defaults.retry.backoff_cap.as_millis() as u64,
            jitter_ratio: defaults.retry.jitter_ratio,
            acquire_deadline_ms: None,
            store_timeout_ms: defaults.store_timeout.as_millis() as u64,
            auto_renew: defaults.auto_renew,
        }
    }
}

impl From<RawLockOptions> for LockOptions {
    fn from(raw: RawLockOptions) -> Self {
        Self {
            ttl_default: Duration::from_millis(raw.ttl_default_ms),
            retry: RetryPolicy {
                max_attempts: raw.max_attempts,
                base_backoff: Duration::from_millis(raw.base_backoff_ms),
                backoff_cap: Duration::from_millis(raw.backoff_cap_ms),
                jitter_ratio: raw.jitter_ratio,
                acquire_deadline: raw.acquire_deadline_ms.map(Duration::from_millis),
            },
            store_timeout: Duration::from_millis(raw.store_timeout_ms),
            auto_renew: raw.auto_renew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LockOptions::default().validate().unwrap();
    }

    #[test]
    fn toml_overrides_and_defaults() {
        let options = LockOptions::from_toml_str(
            r#"
            ttl_default_ms = 10000
            max_attempts = 3
            acquire_deadline_ms = 2500
            auto_renew = false
            "#,
        )
        .unwrap();

        assert_eq!(options.ttl_default, Duration::from_secs(10));
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.acquire_deadline, Some(Duration::from_millis(2500)));
        assert!(!options.auto_renew);
        assert_eq!(options.retry.base_backoff, Duration::from_millis(50));
        assert_eq!(options.store_timeout, Duration::from_secs(5));
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(LockOptions::from_toml_str("").unwrap(), LockOptions::default());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            LockOptions::from_toml_str("ttl = 5"),
            Err(LockError::InvalidConfig(_))
        ));
        assert!(matches!(
            LockOptions::from_toml_str("jitter_ratio = 1.5"),
            Err(LockError::InvalidConfig(_))
        ));
        assert!(matches!(
            LockOptions::from_toml_str("max_attempts = 0"),
            Err(LockError::InvalidConfig(_))
        ));
        assert!(matches!(
            LockOptions::from_toml_str("base_backoff_ms = 900\nbackoff_cap_ms = 100"),
            Err(LockError::InvalidConfig(_))
        ));
        assert!(matches!(
            LockOptions::from_toml_str("ttl_default_ms = 0"),
            Err(LockError::InvalidConfig(_))
        ));
    }
}
