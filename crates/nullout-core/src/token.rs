//! Stateless confirmation tokens.
//!
//! Wire form: `base64url(claims_json) "." base64url(hmac_sha256(claims_json))`.
//! The `.` sits outside the base64 alphabet, so it can never appear inside
//! either half. Validity is decided entirely by the tag and the expiry.

use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 2;

/// Key material for token tags. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::Configuration(
                "token signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Opaque, transport-safe token string. The only input the executor accepts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConfirmationToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl FromStr for ConfirmationToken {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfirmationToken({} chars)", self.0.len())
    }
}

/// What a token is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub finding_id: String,
    pub root: String,
    pub path: String,
    pub identity: FileIdentity,
}

/// Signed payload. Field names are short because they travel in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub v: u8,
    pub fnd: String,
    pub root: String,
    pub path: String,
    pub vol: u32,
    pub fid: u64,
    /// Expiry as Unix milliseconds.
    pub exp: i64,
}

impl TokenClaims {
    pub fn identity(&self) -> FileIdentity {
        FileIdentity::new(self.vol, self.fid)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.exp)
    }
}

/// Claims whose tag and expiry have been checked. Only
/// [`TokenCodec::verify`] can produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    claims: TokenClaims,
}

impl VerifiedToken {
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: ConfirmationToken,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: SigningSecret,
}

impl TokenCodec {
    pub fn new(secret: SigningSecret) -> Self {
        Self { secret }
    }

    pub fn issue(&self, subject: &TokenSubject, ttl: TimeDelta) -> Result<IssuedToken> {
        self.issue_at(subject, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: &TokenSubject,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::Configuration(format!("token TTL out of range: {ttl}")))?;

        let claims = TokenClaims {
            v: TOKEN_VERSION,
            fnd: subject.finding_id.clone(),
            root: subject.root.clone(),
            path: subject.path.clone(),
            vol: subject.identity.volume_serial,
            fid: subject.identity.file_id,
            exp: expires_at.timestamp_millis(),
        };
        let body = serde_json::to_vec(&claims)
            .map_err(|e| Error::Configuration(format!("token claims not serializable: {e}")))?;
        let tag = self.tag(&body)?;

        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(tag)
        );
        Ok(IssuedToken {
            token: ConfirmationToken(token),
            // Expiry is carried at millisecond precision; report what was signed.
            expires_at: claims.expires_at().unwrap_or(expires_at),
        })
    }

    pub fn verify(&self, token: &ConfirmationToken) -> Result<VerifiedToken> {
        self.verify_at(token, Utc::now())
    }

    /// Check the tag first, then the expiry. Claims are only parsed once the
    /// tag has matched.
    pub fn verify_at(
        &self,
        token: &ConfirmationToken,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken> {
        let (body_b64, tag_b64) = token.0.split_once('.').ok_or(Error::TamperedToken)?;
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| Error::TamperedToken)?;
        let presented = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| Error::TamperedToken)?;

        let expected = self.tag(&body)?;
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            warn!("Rejected confirmation token with mismatched signature");
            return Err(Error::TamperedToken);
        }

        let claims: TokenClaims =
            serde_json::from_slice(&body).map_err(|_| Error::TamperedToken)?;
        if claims.v != TOKEN_VERSION {
            return Err(Error::TamperedToken);
        }
        if now.timestamp_millis() > claims.exp {
            return Err(Error::TokenExpired);
        }
        Ok(VerifiedToken { claims })
    }

    fn tag(&self, body: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.0)
            .map_err(|e| Error::Configuration(format!("invalid signing key: {e}")))?;
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
