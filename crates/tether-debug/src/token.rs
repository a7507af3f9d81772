//! Signed query tokens.
//!
//! The panel hands every captured `SELECT` to the browser as an opaque token
//! so the replay endpoints only ever run statements the server itself
//! executed. Token format: `base64url(json{sql, params}).hex(hmac_sha256)`.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::PanelError;

/// Salt mixed into the signing key so tokens are not valid in other contexts.
pub const TOKEN_SALT: &str = "tether-sql-query";

#[derive(Debug, Serialize, Deserialize)]
struct SignedQuery {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// Signs and verifies replayable query tokens.
#[derive(Clone)]
pub struct QuerySigner {
    key: [u8; 32],
}

impl std::fmt::Debug for QuerySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySigner").finish_non_exhaustive()
    }
}

impl QuerySigner {
    /// Derives the signing key from the application secret.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(TOKEN_SALT.as_bytes());
        hasher.update(b":");
        hasher.update(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        Self { key }
    }

    /// Returns a token for `sql`, or `None` if the statement is not a
    /// `SELECT` and therefore must not be replayed.
    pub fn dumps(&self, sql: &str, params: &[Value]) -> Option<String> {
        if !is_select(sql) {
            return None;
        }
        let payload = SignedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        let json = serde_json::to_vec(&payload).ok()?;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(encoded.as_bytes()).finalize().into_bytes());
        Some(format!("{encoded}.{signature}"))
    }

    /// Verifies a token and returns the signed statement and parameters.
    ///
    /// # Errors
    ///
    /// Returns `PanelError::BadSignature` if the token is malformed or its
    /// signature does not match, and `PanelError::NotReplayable` if it
    /// carries anything but a `SELECT`.
    pub fn loads(&self, token: &str) -> Result<(String, Vec<Value>), PanelError> {
        let (encoded, signature) = token.rsplit_once('.').ok_or(PanelError::BadSignature)?;
        let signature = hex::decode(signature).map_err(|_| PanelError::BadSignature)?;
        self.mac(encoded.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| PanelError::BadSignature)?;

        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| PanelError::BadSignature)?;
        let query: SignedQuery =
            serde_json::from_slice(&json).map_err(|_| PanelError::BadSignature)?;
        if !is_select(&query.sql) {
            return Err(PanelError::NotReplayable);
        }
        Ok((query.sql, query.params))
    }

    fn mac(&self, data: &[u8]) -> Hmac<Sha256> {
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(&self.key).expect("HMAC key length is valid");
        mac.update(data);
        mac
    }
}

/// Whether `sql` is a single read-only `SELECT` statement.
pub fn is_select(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let head = trimmed.get(..6).unwrap_or_default();
    head.eq_ignore_ascii_case("select")
        && !trimmed.trim_end().trim_end_matches(';').contains(';')
}
