use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concord_core::AccountingMode;

use crate::error::AgentError;

/// Claims minted per §4.5 step 5: `{sub, tenant, pool_id, model_alias,
/// accounting_mode, pool_mapping_version, exp, jti}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClaims {
    pub sub: String,
    pub tenant: String,
    pub pool_id: String,
    pub model_alias: String,
    pub accounting_mode: AccountingMode,
    pub pool_mapping_version: u32,
    pub exp: i64,
    pub jti: String,
}

/// One ES256 keypair with a stable key id. The secret PEM is held in a
/// `secrecy::SecretString` (zeroized on drop) and never surfaces in `Debug`
/// — the same "wrap the secret, redact Debug" shape the reference
/// platform's `KeyPair` uses for its Dilithium secret key, substituting
/// ES256 for the post-quantum scheme this repo has no PoW/consensus use for.
pub struct SigningKey {
    pub key_id: String,
    secret_pem: SecretString,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    pub created_at: DateTime<Utc>,
}

impl SigningKey {
    /// `private_pem` is a PKCS8 EC private key (signs); `public_pem` is the
    /// corresponding SEC1/PEM public key (verifies). Kept as two PEMs
    /// because that's the shape `jsonwebtoken`'s ES256 key constructors
    /// take — there is no single combined PEM parse for EC keys.
    pub fn from_ec_pem(
        key_id: impl Into<String>,
        private_pem: &str,
        public_pem: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, AgentError> {
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AgentError::Signing(format!("invalid EC private key: {e}")))?;
        let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| AgentError::Signing(format!("invalid EC public key: {e}")))?;
        Ok(Self {
            key_id: key_id.into(),
            secret_pem: SecretString::new(private_pem.to_string()),
            encoding_key,
            decoding_key,
            created_at: now,
        })
    }

    /// Exposes the raw PEM — only for re-deriving keys (e.g. on restart from
    /// a secret store). Never logged.
    pub fn expose_pem(&self) -> &str {
        self.secret_pem.expose_secret()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey {{ key_id: {:?} }}", self.key_id)
    }
}

/// Current + previous signing key with a rotation overlap window (§4.5 step
/// 5, §9.A open question): both keys verify during the overlap; only
/// `current` mints. Rotation replaces `current`, demoting the old one to
/// `previous` with a fresh expiry instead of dropping it immediately.
pub struct SigningKeyRing {
    current: SigningKey,
    previous: Option<(SigningKey, DateTime<Utc>)>,
    overlap: ChronoDuration,
}

impl SigningKeyRing {
    pub fn new(initial: SigningKey, overlap_hours: i64) -> Self {
        Self {
            current: initial,
            previous: None,
            overlap: ChronoDuration::hours(overlap_hours),
        }
    }

    pub fn current_key_id(&self) -> &str {
        &self.current.key_id
    }

    /// Rotate in a new key, demoting the current one to `previous` with an
    /// expiry `overlap` from now. Any prior `previous` key is discarded —
    /// the spec only guarantees two live keys at once.
    pub fn rotate(&mut self, new_key: SigningKey, now: DateTime<Utc>) {
        let expires_at = now + self.overlap;
        let old_current = std::mem::replace(&mut self.current, new_key);
        self.previous = Some((old_current, expires_at));
    }

    pub fn mint(&self, mut claims: AgentClaims) -> Result<String, AgentError> {
        claims.jti = Uuid::new_v4().to_string();
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.current.key_id.clone());
        jsonwebtoken::encode(&header, &claims, &self.current.encoding_key)
            .map_err(|e| AgentError::Signing(e.to_string()))
    }

    /// Verify `token`, accepting either the current key or a still-live
    /// previous key (§9.A: "both current and previous keys are accepted").
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AgentClaims, AgentError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AgentError::Signing(format!("invalid token header: {e}")))?;
        let kid = header.kid.as_deref();

        let key = if kid == Some(self.current.key_id.as_str()) || kid.is_none() {
            &self.current
        } else if let Some((prev, expires_at)) = &self.previous {
            if kid == Some(prev.key_id.as_str()) && now < *expires_at {
                prev
            } else {
                return Err(AgentError::Signing("unknown or expired signing key id".into()));
            }
        } else {
            return Err(AgentError::Signing("unknown signing key id".into()));
        };

        let validation = Validation::new(Algorithm::ES256);
        let data = jsonwebtoken::decode::<AgentClaims>(token, &key.decoding_key, &validation)
            .map_err(|e| AgentError::Signing(e.to_string()))?;
        Ok(data.claims)
    }
}
