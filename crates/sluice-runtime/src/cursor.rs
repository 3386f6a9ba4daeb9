//! Pagination continuation tokens.
//!
//! Token layout:
//!
//! ```text
//! c1.<base64url(payload)>.<base64url(hmac-sha256)>     signed
//! c1.<base64url(payload)>                              insecure dev mode
//! ```
//!
//! The payload is compact JSON carrying the position, the fingerprint of
//! the query it belongs to and the issue time. Signed tokens are
//! authenticated over everything before the last `.` before any other part
//! of the token is interpreted, so any alteration reads as
//! `SIGNATURE_INVALID`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use sluice_core::{CursorConfig, short_hash};
use subtle::ConstantTimeEq;

use crate::error::CursorError;

type HmacSha256 = Hmac<Sha256>;

/// Current token version prefix.
pub const TOKEN_VERSION: &str = "c1";

/// Issue times further in the future than this are rejected.
const CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorPosition {
    /// Last seen sort key tuple.
    Keyset {
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Offset {
        offset: u64,
        limit: u64,
    },
}

impl CursorPosition {
    pub fn kind(&self) -> &'static str {
        match self {
            CursorPosition::Keyset { .. } => "keyset",
            CursorPosition::Offset { .. } => "offset",
        }
    }

    fn is_well_formed(&self) -> bool {
        match self {
            CursorPosition::Keyset { columns, values } => {
                !columns.is_empty() && columns.len() == values.len()
            }
            CursorPosition::Offset { limit, .. } => *limit > 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorPayload {
    #[serde(rename = "p")]
    position: CursorPosition,
    #[serde(rename = "f")]
    fingerprint: String,
    #[serde(rename = "t")]
    issued_at: i64,
}

/// How tokens are authenticated.
#[derive(Clone)]
pub enum SigningKey {
    Hmac(Vec<u8>),
    /// Unsigned tokens. Only reachable through `allow_insecure_dev`.
    InsecureUnsigned,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::Hmac(_) => f.write_str("SigningKey::Hmac(<redacted>)"),
            SigningKey::InsecureUnsigned => f.write_str("SigningKey::InsecureUnsigned"),
        }
    }
}

impl SigningKey {
    pub fn is_signed(&self) -> bool {
        matches!(self, SigningKey::Hmac(_))
    }
}

/// Resolve the signing key from configuration. Fails closed unless the
/// insecure development override is set explicitly.
pub fn resolve_secret(config: &CursorConfig) -> Result<SigningKey, CursorError> {
    match config.configured_secret() {
        Some(secret) => Ok(SigningKey::Hmac(secret.into_bytes())),
        None if config.allow_insecure_dev => {
            tracing::warn!("no cursor secret configured, issuing unsigned page tokens");
            Ok(SigningKey::InsecureUnsigned)
        }
        None => Err(CursorError::SecretMissing),
    }
}

/// Stable fingerprint of the parts a token is bound to.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut bytes: Vec<&[u8]> = Vec::with_capacity(parts.len() + 1);
    bytes.push(b"cursor-fingerprint");
    bytes.extend(parts.iter().map(|p| p.as_bytes()));
    short_hash(&bytes)
}

/// Non-secret facts about a token, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorInspection {
    pub version: String,
    pub signed: bool,
    pub position_kind: &'static str,
    pub fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

/// Encodes and verifies continuation tokens.
#[derive(Debug, Clone)]
pub struct CursorCodec {
    ttl: Duration,
    max_length: usize,
}

impl CursorCodec {
    pub fn new(ttl: Duration, max_length: usize) -> Self {
        Self { ttl, max_length }
    }

    pub fn from_config(config: &CursorConfig) -> Self {
        Self::new(config.ttl(), config.max_token_length)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Encode a position bound to `fingerprint`.
    pub fn encode(
        &self,
        position: &CursorPosition,
        fingerprint: &str,
        key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<String, CursorError> {
        let payload = CursorPayload {
            position: position.clone(),
            fingerprint: fingerprint.to_string(),
            issued_at: now.timestamp(),
        };
        let json = serde_json::to_vec(&payload).map_err(|_| CursorError::Malformed)?;
        let body = format!("{}.{}", TOKEN_VERSION, URL_SAFE_NO_PAD.encode(json));

        match key {
            SigningKey::Hmac(secret) => {
                let signature = sign(secret, body.as_bytes())?;
                Ok(format!("{}.{}", body, URL_SAFE_NO_PAD.encode(signature)))
            }
            SigningKey::InsecureUnsigned => Ok(body),
        }
    }

    /// Decode a token, verifying signature, version, expiry and fingerprint.
    pub fn decode(
        &self,
        token: &str,
        expected_fingerprint: &str,
        key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<CursorPosition, CursorError> {
        let payload = self.open(token, key)?;
        self.check_freshness(&payload, now)?;

        let matches: bool = payload
            .fingerprint
            .as_bytes()
            .ct_eq(expected_fingerprint.as_bytes())
            .into();
        if !matches {
            return Err(CursorError::FingerprintMismatch);
        }
        Ok(payload.position)
    }

    /// Verify a token and report its metadata without the position values.
    pub fn inspect(
        &self,
        token: &str,
        key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<CursorInspection, CursorError> {
        let payload = self.open(token, key)?;
        let issued_at =
            DateTime::<Utc>::from_timestamp(payload.issued_at, 0).ok_or(CursorError::Malformed)?;
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|_| CursorError::Malformed)?;
        let expires_at = issued_at + ttl;
        Ok(CursorInspection {
            version: TOKEN_VERSION.to_string(),
            signed: key.is_signed(),
            position_kind: payload.position.kind(),
            fingerprint: payload.fingerprint,
            issued_at,
            expires_at,
            expired: now > expires_at,
        })
    }

    /// Authenticate and parse, without freshness or fingerprint checks.
    fn open(&self, token: &str, key: &SigningKey) -> Result<CursorPayload, CursorError> {
        if token.len() > self.max_length {
            return Err(CursorError::TooLarge);
        }

        let body = match key {
            SigningKey::Hmac(secret) => {
                let (body, signature) = token.rsplit_once('.').ok_or(CursorError::SignatureInvalid)?;
                let signature = URL_SAFE_NO_PAD
                    .decode(signature)
                    .map_err(|_| CursorError::SignatureInvalid)?;
                let expected = sign(secret, body.as_bytes())?;
                let valid: bool = expected.ct_eq(signature.as_slice()).into();
                if !valid {
                    return Err(CursorError::SignatureInvalid);
                }
                body
            }
            SigningKey::InsecureUnsigned => {
                // A signed token cannot be verified here; refuse it.
                if token.matches('.').count() != 1 {
                    return Err(CursorError::SignatureInvalid);
                }
                token
            }
        };

        let (version, encoded) = body.split_once('.').ok_or(CursorError::Malformed)?;
        if version != TOKEN_VERSION {
            let looks_versioned = version.len() > 1
                && version.starts_with('c')
                && version[1..].bytes().all(|b| b.is_ascii_digit());
            return Err(if looks_versioned {
                CursorError::UnsupportedVersion
            } else {
                CursorError::Malformed
            });
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CursorError::Malformed)?;
        let payload: CursorPayload =
            serde_json::from_slice(&json).map_err(|_| CursorError::Malformed)?;
        if !payload.position.is_well_formed() {
            return Err(CursorError::Malformed);
        }
        Ok(payload)
    }

    fn check_freshness(&self, payload: &CursorPayload, now: DateTime<Utc>) -> Result<(), CursorError> {
        let age = now.timestamp().saturating_sub(payload.issued_at);
        if age < 0 && age.unsigned_abs() > CLOCK_SKEW.as_secs() {
            return Err(CursorError::Malformed);
        }
        if age > 0 && age.unsigned_abs() > self.ttl.as_secs() {
            return Err(CursorError::Expired);
        }
        Ok(())
    }
}

fn sign(secret: &[u8], body: &[u8]) -> Result<Vec<u8>, CursorError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CursorError::SecretMissing)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn codec() -> CursorCodec {
        CursorCodec::new(Duration::from_secs(3600), 2048)
    }

    fn key() -> SigningKey {
        SigningKey::Hmac(b"test-secret-0123456789".to_vec())
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap()
    }

    fn offset(offset: u64, limit: u64) -> CursorPosition {
        CursorPosition::Offset { offset, limit }
    }

    #[test]
    fn test_round_trip_offset_and_keyset() {
        let codec = codec();
        let fp = fingerprint(&["q", "t"]);

        let token = codec.encode(&offset(200, 100), &fp, &key(), now()).unwrap();
        assert!(token.starts_with("c1."));
        assert_eq!(token.matches('.').count(), 2);
        assert_eq!(codec.decode(&token, &fp, &key(), now()).unwrap(), offset(200, 100));

        let keyset = CursorPosition::Keyset {
            columns: vec!["created_at".into(), "id".into()],
            values: vec![json!("2026-01-01T00:00:00Z"), json!(42)],
        };
        let token = codec.encode(&keyset, &fp, &key(), now()).unwrap();
        assert_eq!(codec.decode(&token, &fp, &key(), now()).unwrap(), keyset);
    }

    #[test]
    fn test_wrong_key_is_signature_invalid() {
        let fp = fingerprint(&["q"]);
        let token = codec().encode(&offset(0, 10), &fp, &key(), now()).unwrap();
        let other = SigningKey::Hmac(b"another-secret".to_vec());
        assert_eq!(codec().decode(&token, &fp, &other, now()), Err(CursorError::SignatureInvalid));
    }

    #[test]
    fn test_unsigned_token_rejected_when_signing() {
        let fp = fingerprint(&["q"]);
        let token = codec()
            .encode(&offset(0, 10), &fp, &SigningKey::InsecureUnsigned, now())
            .unwrap();
        assert_eq!(token.matches('.').count(), 1);
        assert_eq!(codec().decode(&token, &fp, &key(), now()), Err(CursorError::SignatureInvalid));
        assert_eq!(
            codec().decode(&token, &fp, &SigningKey::InsecureUnsigned, now()).unwrap(),
            offset(0, 10)
        );

        let signed = codec().encode(&offset(0, 10), &fp, &key(), now()).unwrap();
        assert_eq!(
            codec().decode(&signed, &fp, &SigningKey::InsecureUnsigned, now()),
            Err(CursorError::SignatureInvalid)
        );
    }

    #[test]
    fn test_fingerprint_mismatch() {
        let token = codec().encode(&offset(0, 10), &fingerprint(&["a"]), &key(), now()).unwrap();
        assert_eq!(
            codec().decode(&token, &fingerprint(&["b"]), &key(), now()),
            Err(CursorError::FingerprintMismatch)
        );
    }

    #[test]
    fn test_expiry_and_future_tokens() {
        let fp = fingerprint(&["q"]);
        let token = codec().encode(&offset(0, 10), &fp, &key(), now()).unwrap();

        let later = now() + chrono::Duration::seconds(3601);
        assert_eq!(codec().decode(&token, &fp, &key(), later), Err(CursorError::Expired));

        let edge = now() + chrono::Duration::seconds(3600);
        assert!(codec().decode(&token, &fp, &key(), edge).is_ok());

        let earlier = now() - chrono::Duration::seconds(120);
        assert_eq!(codec().decode(&token, &fp, &key(), earlier), Err(CursorError::Malformed));
    }

    #[test]
    fn test_oversized_token() {
        let codec = CursorCodec::new(Duration::from_secs(60), 16);
        let token = "c1.".to_string() + &"A".repeat(64);
        assert_eq!(codec.decode(&token, "fp", &key(), now()), Err(CursorError::TooLarge));
    }

    #[test]
    fn test_version_and_shape_errors() {
        let unsigned = SigningKey::InsecureUnsigned;
        let payload = URL_SAFE_NO_PAD.encode(br#"{"p":{"kind":"offset","offset":0,"limit":1},"f":"x","t":0}"#);
        assert_eq!(
            codec().decode(&format!("c2.{payload}"), "x", &unsigned, now()),
            Err(CursorError::UnsupportedVersion)
        );
        assert_eq!(
            codec().decode(&format!("zz.{payload}"), "x", &unsigned, now()),
            Err(CursorError::Malformed)
        );
        assert_eq!(
            codec().decode("c1.!!!", "x", &unsigned, now()),
            Err(CursorError::Malformed)
        );
        let zero_limit = URL_SAFE_NO_PAD.encode(br#"{"p":{"kind":"offset","offset":0,"limit":0},"f":"x","t":0}"#);
        assert_eq!(
            codec().decode(&format!("c1.{zero_limit}"), "x", &unsigned, now()),
            Err(CursorError::Malformed)
        );
    }

    #[test]
    fn test_missing_secret_fails_closed() {
        let config = CursorConfig {
            secret: None,
            secret_env: None,
            allow_insecure_dev: false,
            ..Default::default()
        };
        assert_eq!(resolve_secret(&config).unwrap_err(), CursorError::SecretMissing);

        let dev = CursorConfig {
            allow_insecure_dev: true,
            ..config
        };
        assert!(!resolve_secret(&dev).unwrap().is_signed());
    }

    #[test]
    fn test_errors_do_not_echo_token() {
        let fp = fingerprint(&["q"]);
        let token = codec().encode(&offset(7, 10), &fp, &key(), now()).unwrap();
        let err = codec().decode(&token, "other", &key(), now()).unwrap_err();
        let text = err.to_string();
        assert!(!text.contains(&token));
        assert!(!text.contains(&fp));
    }

    #[test]
    fn test_inspect_reports_metadata() {
        let fp = fingerprint(&["q"]);
        let token = codec().encode(&offset(7, 10), &fp, &key(), now()).unwrap();
        let inspection = codec().inspect(&token, &key(), now()).unwrap();
        assert!(inspection.signed);
        assert_eq!(inspection.position_kind, "offset");
        assert_eq!(inspection.fingerprint, fp);
        assert!(!inspection.expired);
    }

    proptest! {
        #[test]
        fn any_single_byte_change_is_signature_invalid(
            index in 0usize..512,
            replacement in proptest::char::range('!', '~'),
        ) {
            let fp = fingerprint(&["q", "tenant"]);
            let token = codec().encode(&offset(300, 100), &fp, &key(), now()).unwrap();
            let index = index % token.len();
            let original = token.as_bytes()[index] as char;
            prop_assume!(original != replacement);

            let mut tampered: Vec<char> = token.chars().collect();
            tampered[index] = replacement;
            let tampered: String = tampered.into_iter().collect();

            prop_assert_eq!(
                codec().decode(&tampered, &fp, &key(), now()),
                Err(CursorError::SignatureInvalid)
            );
        }
    }
}
