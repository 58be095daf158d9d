//! Fencing token checks for the protected side.
//!
//! A lease can lapse while its former holder is paused, so the holder may keep
//! writing after someone else took over. Tagging writes with the fencing token
//! and rejecting anything older than the highest token seen closes that gap.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

/// A write carried a token older than one already accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stale fencing token {token} for '{resource}' (highest seen: {highest})")]
pub struct StaleFencingToken {
    pub resource: String,
    pub token: u64,
    pub highest: u64,
}

/// Tracks the highest fencing token accepted per resource.
#[derive(Debug, Default)]
pub struct FencingGuard {
    highest: Mutex<HashMap<String, u64>>,
}

impl FencingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` if it is at least the highest seen for `resource`, and
    /// records it. Equal tokens pass, since one holder may write many times.
    pub fn observe(&self, resource: &str, token: u64) -> Result<(), StaleFencingToken> {
        let mut highest = self
            .highest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seen = highest.entry(resource.to_string()).or_insert(0);
        if token < *seen {
            debug!(resource, token, highest = *seen, "rejected stale fencing token");
            return Err(StaleFencingToken {
                resource: resource.to_string(),
                token,
                highest: *seen,
            });
        }
        *seen = token;
        Ok(())
    }

    /// Like [`observe`](Self::observe) but does not record the token.
    pub fn check(&self, resource: &str, token: u64) -> Result<(), StaleFencingToken> {
        let highest = self.highest(resource).unwrap_or(0);
        if token < highest {
            return Err(StaleFencingToken {
                resource: resource.to_string(),
                token,
                highest,
            });
        }
        Ok(())
    }

    pub fn highest(&self, resource: &str) -> Option<u64> {
        self.highest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(resource)
            .copied()
    }
}
