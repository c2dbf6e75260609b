//! Ledger configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Namespace for this wallet's persisted state.
    #[serde(default = "default_wallet_id")]
    pub wallet_id: String,

    #[serde(default = "default_mint_url")]
    pub mint_url: String,

    #[serde(default = "default_unit")]
    pub unit: String,

    /// How many consumed mint quotes to remember.
    #[serde(default = "default_log_capacity")]
    pub used_quote_capacity: usize,

    /// How many redeemed tokens to remember.
    #[serde(default = "default_log_capacity")]
    pub redeemed_token_capacity: usize,

    /// Spent-check new proofs in the background after they are added.
    #[serde(default = "default_true")]
    pub background_verify: bool,

    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Window size for `restore` when the caller passes none.
    #[serde(default = "default_restore_count")]
    pub restore_count: u64,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_wallet_id() -> String {
    "default".to_string()
}

fn default_mint_url() -> String {
    "https://mint.minibits.cash/Bitcoin".to_string()
}

fn default_unit() -> String {
    "sat".to_string()
}

fn default_log_capacity() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_verify_delay_ms() -> u64 {
    500
}

fn default_restore_count() -> u64 {
    100
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            wallet_id: default_wallet_id(),
            mint_url: default_mint_url(),
            unit: default_unit(),
            used_quote_capacity: default_log_capacity(),
            redeemed_token_capacity: default_log_capacity(),
            background_verify: true,
            verify_delay_ms: default_verify_delay_ms(),
            restore_count: default_restore_count(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn new(wallet_id: impl Into<String>, mint_url: impl Into<String>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            mint_url: mint_url.into(),
            ..Self::default()
        }
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    /// Load configuration from `ARKCASH_*` environment variables.
    pub fn from_env() -> LedgerResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LedgerResult<Self> {
        let defaults = Self::default();
        let recovery = RecoveryConfig::default();

        let config = Self {
            wallet_id: lookup("ARKCASH_WALLET_ID").unwrap_or(defaults.wallet_id),
            mint_url: lookup("ARKCASH_MINT_URL").unwrap_or(defaults.mint_url),
            unit: lookup("ARKCASH_UNIT").unwrap_or(defaults.unit),
            used_quote_capacity: parse_var(&lookup, "ARKCASH_USED_QUOTE_CAPACITY", defaults.used_quote_capacity)?,
            redeemed_token_capacity: parse_var(&lookup, "ARKCASH_REDEEMED_TOKEN_CAPACITY", defaults.redeemed_token_capacity)?,
            background_verify: parse_var(&lookup, "ARKCASH_BACKGROUND_VERIFY", defaults.background_verify)?,
            verify_delay_ms: parse_var(&lookup, "ARKCASH_VERIFY_DELAY_MS", defaults.verify_delay_ms)?,
            restore_count: parse_var(&lookup, "ARKCASH_RESTORE_COUNT", defaults.restore_count)?,
            recovery: RecoveryConfig {
                collision_skip: parse_var(&lookup, "ARKCASH_COLLISION_SKIP", recovery.collision_skip)?,
                wide_scan_start: parse_var(&lookup, "ARKCASH_WIDE_SCAN_START", recovery.wide_scan_start)?,
                wide_scan_count: parse_var(&lookup, "ARKCASH_WIDE_SCAN_COUNT", recovery.wide_scan_count)?,
                reset_scan_count: parse_var(&lookup, "ARKCASH_RESET_SCAN_COUNT", recovery.reset_scan_count)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.wallet_id.is_empty() || self.wallet_id.contains(':') {
            return Err(LedgerError::InvalidConfig(format!(
                "wallet id must be non-empty and contain no ':' (got {:?})",
                self.wallet_id
            )));
        }
        if self.mint_url.trim().is_empty() {
            return Err(LedgerError::InvalidConfig("mint url is empty".to_string()));
        }
        if self.recovery.collision_skip == 0 {
            return Err(LedgerError::InvalidConfig(
                "collision skip must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse an optional variable, falling back to `default` when unset.
pub fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> LedgerResult<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| LedgerError::InvalidConfig(format!("{name}={raw:?}: {e}"))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Tuning for counter collision recovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Distance to jump past a colliding counter on the retry.
    #[serde(default = "default_collision_skip")]
    pub collision_skip: u64,

    #[serde(default)]
    pub wide_scan_start: u64,

    #[serde(default = "default_scan_count")]
    pub wide_scan_count: u64,

    /// Scan window used by `reset_state` to pick a starting counter.
    #[serde(default = "default_scan_count")]
    pub reset_scan_count: u64,
}

fn default_collision_skip() -> u64 {
    20
}

fn default_scan_count() -> u64 {
    50
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            collision_skip: default_collision_skip(),
            wide_scan_start: 0,
            wide_scan_count: default_scan_count(),
            reset_scan_count: default_scan_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.wallet_id, "default");
        assert_eq!(config.used_quote_capacity, 100);
        assert_eq!(config.recovery.collision_skip, 20);
        assert_eq!(config.recovery.wide_scan_count, 50);
        assert_eq!(config.verify_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_overrides() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("ARKCASH_WALLET_ID", "shadow"),
            ("ARKCASH_COLLISION_SKIP", "35"),
            ("ARKCASH_BACKGROUND_VERIFY", "false"),
        ]))
        .unwrap();
        assert_eq!(config.wallet_id, "shadow");
        assert_eq!(config.recovery.collision_skip, 35);
        assert!(!config.background_verify);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = LedgerConfig::from_lookup(lookup(&[("ARKCASH_WIDE_SCAN_COUNT", "many")]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig(_)));

        let err =
            LedgerConfig::from_lookup(lookup(&[("ARKCASH_WALLET_ID", "a:b")])).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig(_)));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"mint_url":"https://mint.test"}"#).unwrap();
        assert_eq!(config.mint_url, "https://mint.test");
        assert_eq!(config.restore_count, 100);
        assert_eq!(config.recovery, RecoveryConfig::default());
    }
}
