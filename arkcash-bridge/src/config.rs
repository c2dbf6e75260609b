//! Bridge configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Floor for the routing-fee buffer on encrypt.
    #[serde(default = "default_min_fee_buffer")]
    pub min_fee_buffer_sats: u64,

    /// Routing-fee buffer as basis points of the amount.
    #[serde(default = "default_fee_buffer_bps")]
    pub fee_buffer_bps: u64,

    /// Pause after the custodial payment before polling the mint.
    #[serde(default = "default_payment_settle_delay_ms")]
    pub payment_settle_delay_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub confirmation_poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub confirmation_max_attempts: u32,

    /// Pause after the melt before refreshing the custodial balance.
    #[serde(default = "default_decrypt_settle_delay_ms")]
    pub decrypt_settle_delay_ms: u64,

    /// How long a finished saga stays visible.
    #[serde(default = "default_saga_clear_delay_ms")]
    pub saga_clear_delay_ms: u64,

    #[serde(default = "default_invoice_description")]
    pub invoice_description: String,

    #[serde(default = "default_min_address_len")]
    pub min_exit_address_len: usize,
}

fn default_min_fee_buffer() -> u64 {
    10
}

fn default_fee_buffer_bps() -> u64 {
    500
}

fn default_payment_settle_delay_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    20
}

fn default_decrypt_settle_delay_ms() -> u64 {
    3_000
}

fn default_saga_clear_delay_ms() -> u64 {
    2_000
}

fn default_invoice_description() -> String {
    "ecash to ark".to_string()
}

fn default_min_address_len() -> usize {
    26
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_fee_buffer_sats: default_min_fee_buffer(),
            fee_buffer_bps: default_fee_buffer_bps(),
            payment_settle_delay_ms: default_payment_settle_delay_ms(),
            confirmation_poll_interval_ms: default_poll_interval_ms(),
            confirmation_max_attempts: default_max_attempts(),
            decrypt_settle_delay_ms: default_decrypt_settle_delay_ms(),
            saga_clear_delay_ms: default_saga_clear_delay_ms(),
            invoice_description: default_invoice_description(),
            min_exit_address_len: default_min_address_len(),
        }
    }
}

impl BridgeConfig {
    /// Routing-fee allowance for moving `amount`: `max(floor, ceil(amount * bps / 10000))`.
    pub fn fee_buffer(&self, amount: u64) -> u64 {
        let proportional = (u128::from(amount) * u128::from(self.fee_buffer_bps)).div_ceil(10_000);
        let proportional = u64::try_from(proportional).unwrap_or(u64::MAX);
        proportional.max(self.min_fee_buffer_sats)
    }

    pub fn payment_settle_delay(&self) -> Duration {
        Duration::from_millis(self.payment_settle_delay_ms)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn decrypt_settle_delay(&self) -> Duration {
        Duration::from_millis(self.decrypt_settle_delay_ms)
    }

    pub fn saga_clear_delay(&self) -> Duration {
        Duration::from_millis(self.saga_clear_delay_ms)
    }

    /// Load configuration from `ARKCASH_*` environment variables.
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<Self> {
        let d = Self::default();
        let config = Self {
            min_fee_buffer_sats: parse_var(&lookup, "ARKCASH_MIN_FEE_BUFFER_SATS", d.min_fee_buffer_sats)?,
            fee_buffer_bps: parse_var(&lookup, "ARKCASH_FEE_BUFFER_BPS", d.fee_buffer_bps)?,
            payment_settle_delay_ms: parse_var(&lookup, "ARKCASH_PAYMENT_SETTLE_DELAY_MS", d.payment_settle_delay_ms)?,
            confirmation_poll_interval_ms: parse_var(&lookup, "ARKCASH_POLL_INTERVAL_MS", d.confirmation_poll_interval_ms)?,
            confirmation_max_attempts: parse_var(&lookup, "ARKCASH_POLL_MAX_ATTEMPTS", d.confirmation_max_attempts)?,
            decrypt_settle_delay_ms: parse_var(&lookup, "ARKCASH_DECRYPT_SETTLE_DELAY_MS", d.decrypt_settle_delay_ms)?,
            saga_clear_delay_ms: parse_var(&lookup, "ARKCASH_SAGA_CLEAR_DELAY_MS", d.saga_clear_delay_ms)?,
            invoice_description: lookup("ARKCASH_INVOICE_DESCRIPTION").unwrap_or(d.invoice_description),
            min_exit_address_len: parse_var(&lookup, "ARKCASH_MIN_EXIT_ADDRESS_LEN", d.min_exit_address_len)?,
        };
        if config.confirmation_max_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "confirmation attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> BridgeResult<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| BridgeError::InvalidConfig(format!("{name}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_buffer_floor_and_proportional() {
        let config = BridgeConfig::default();
        assert_eq!(config.fee_buffer(100), 10);
        assert_eq!(config.fee_buffer(1_000), 50);
        assert_eq!(config.fee_buffer(1_001), 51);
        assert_eq!(config.fee_buffer(u64::MAX), u64::MAX / 20 + 1);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BridgeConfig::from_lookup(|name| match name {
            "ARKCASH_POLL_MAX_ATTEMPTS" => Some("5".to_string()),
            "ARKCASH_INVOICE_DESCRIPTION" => Some("to ark".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.confirmation_max_attempts, 5);
        assert_eq!(config.invoice_description, "to ark");
        assert_eq!(config.saga_clear_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_lookup_rejects_zero_attempts() {
        let err = BridgeConfig::from_lookup(|name| {
            (name == "ARKCASH_POLL_MAX_ATTEMPTS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));
    }
}
