//! Transferable token encoding.
//!
//! A token is `cashuA` followed by URL-safe base64 (no padding) of the JSON
//! document `{"token":[{"mint":..,"proofs":[..]}],"unit":..,"memo":..}`.
//! Decoding accepts padded input and the standard base64 alphabet.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{total_amount, Proof};

/// Version prefix of encoded tokens.
pub const TOKEN_PREFIX: &str = "cashuA";

const URI_SCHEME: &str = "cashu:";

const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("missing cashuA prefix")]
    MissingPrefix,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token carries no proofs")]
    Empty,
}

/// Proofs from a single mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub mint: String,
    pub proofs: Vec<Proof>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: Vec<TokenEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Token {
    pub fn new(mint_url: impl Into<String>, proofs: Vec<Proof>, unit: impl Into<String>) -> Self {
        Self {
            token: vec![TokenEntry {
                mint: mint_url.into(),
                proofs,
            }],
            unit: Some(unit.into()),
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn encode(&self) -> Result<String, TokenError> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{TOKEN_PREFIX}{}", TOKEN_ENGINE.encode(json)))
    }

    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let trimmed = encoded.trim();
        let trimmed = trimmed.strip_prefix(URI_SCHEME).unwrap_or(trimmed);
        let body = trimmed
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(TokenError::MissingPrefix)?;
        let body: String = body
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();

        let json = TOKEN_ENGINE.decode(body.as_bytes())?;
        let token: Token = serde_json::from_slice(&json)?;
        if token.proofs().next().is_none() {
            return Err(TokenError::Empty);
        }
        Ok(token)
    }

    pub fn proofs(&self) -> impl Iterator<Item = &Proof> {
        self.token.iter().flat_map(|entry| entry.proofs.iter())
    }

    pub fn mints(&self) -> impl Iterator<Item = &str> {
        self.token.iter().map(|entry| entry.mint.as_str())
    }

    pub fn amount(&self) -> u64 {
        total_amount(self.proofs())
    }
}

/// Stable identifier of an encoded token, used to recognise re-submissions.
pub fn token_digest(encoded: &str) -> String {
    hex::encode(Sha256::digest(encoded.trim().as_bytes()))
}

/// Whether two mint URLs name the same mint.
pub fn same_mint(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches('/').eq_ignore_ascii_case(b.trim().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "https://mint.example.com";

    fn sample_proofs() -> Vec<Proof> {
        vec![
            Proof::new("009a1f293253e41e", 8, "secret-a", "02aa"),
            Proof::new("009a1f293253e41e", 2, "secret-b", "02bb"),
        ]
    }

    #[test]
    fn test_encode_has_prefix_and_no_padding() {
        let encoded = Token::new(MINT, sample_proofs(), "sat").encode().unwrap();
        assert!(encoded.starts_with(TOKEN_PREFIX));
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_decode_restores_proofs_and_amount() {
        let token = Token::new(MINT, sample_proofs(), "sat").with_memo("thanks");
        let decoded = Token::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(decoded.amount(), 10);
        assert_eq!(decoded.mints().collect::<Vec<_>>(), vec![MINT]);
    }

    #[test]
    fn test_decode_accepts_padding_and_uri_scheme() {
        let encoded = Token::new(MINT, sample_proofs(), "sat").encode().unwrap();
        let body = &encoded[TOKEN_PREFIX.len()..];
        let padding = "=".repeat((4 - body.len() % 4) % 4);
        let padded = format!("cashu:{encoded}{padding}\n");
        assert_eq!(Token::decode(&padded).unwrap().amount(), 10);
    }

    #[test]
    fn test_proof_wire_field_names() {
        let json = serde_json::to_value(&sample_proofs()[0]).unwrap();
        assert_eq!(json["id"], "009a1f293253e41e");
        assert_eq!(json["C"], "02aa");
        assert!(json.get("keyset_id").is_none());
    }

    #[test]
    fn test_extra_proof_fields_survive() {
        let raw = serde_json::json!({
            "id": "00ff", "amount": 4, "secret": "s", "C": "02cc",
            "dleq": {"e": "01", "s": "02"}
        });
        let proof: Proof = serde_json::from_value(raw.clone()).unwrap();
        assert!(proof.extra.contains_key("dleq"));
        assert_eq!(serde_json::to_value(&proof).unwrap(), raw);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Token::decode("hello"), Err(TokenError::MissingPrefix)));
        assert!(matches!(Token::decode("cashuA!!!"), Err(TokenError::Base64(_))));

        let empty = Token::new(MINT, vec![], "sat").encode().unwrap();
        assert!(matches!(Token::decode(&empty), Err(TokenError::Empty)));
    }

    #[test]
    fn test_same_mint_ignores_trailing_slash() {
        assert!(same_mint("https://mint.example.com/", MINT));
        assert!(!same_mint("https://other.example.com", MINT));
    }

    #[test]
    fn test_digest_ignores_surrounding_whitespace() {
        assert_eq!(token_digest(" cashuAabc \n"), token_digest("cashuAabc"));
        assert_ne!(token_digest("cashuAabc"), token_digest("cashuAabd"));
    }
}
