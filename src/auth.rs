//! Credential verification gating every pipeline entry point.
//!
//! Two independent credential types: signed bearer tokens for API calls, and
//! platform-signed WebApp login payloads (`initData`) exchanged for a token.
//! Verification failures always collapse to `InvalidCredential` so callers
//! cannot learn which check failed; a verified principal missing from the
//! allow-list is the distinct `AccessDenied`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::PipelineError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ISSUER: &str = "talklens";
const TOKEN_AUDIENCE: &str = "talklens-api";

/// Domain-separation label used to derive the login signing secret from the
/// shared platform token.
const LOGIN_SECRET_LABEL: &[u8] = b"WebAppData";

/// Identity derived from a verified credential. Stateless; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AuthIdentity {
    pub principal: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Identity fields embedded in a verified login payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

/// Result of verifying a platform login payload.
#[derive(Debug, Clone)]
pub struct LoginIdentity {
    /// Normalized (lower-cased) username.
    pub principal: String,
    pub user: PlatformUser,
    /// Unix timestamp the payload was issued at.
    pub auth_date: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: String,
    aud: String,
}

/// Verifies bearer tokens and platform login payloads against a fixed
/// configuration and principal allow-list.
pub struct AuthVerifier {
    config: AuthConfig,
}

impl AuthVerifier {
    pub fn new(config: AuthConfig) -> Result<Self, PipelineError> {
        if config.jwt_secret.as_deref().map_or(true, str::is_empty) {
            return Err(PipelineError::Configuration(
                "JWT secret is not configured".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn jwt_secret(&self) -> &[u8] {
        self.config.jwt_secret.as_deref().unwrap_or_default().as_bytes()
    }

    /// Issue a signed bearer token for a verified principal.
    pub fn issue_token(&self, principal: &str) -> Result<String, PipelineError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.to_string(),
            iat: now.timestamp(),
            exp: (now + ChronoDuration::minutes(self.config.jwt_expires_minutes)).timestamp(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret()),
        )
        .map_err(|e| PipelineError::Configuration(format!("failed to sign token: {}", e)))
    }

    /// Verify a bearer token's signature, expiry, issuer, and audience, then
    /// check the principal against the allow-list.
    pub fn verify_token(&self, token: &str) -> Result<AuthIdentity, PipelineError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret()),
            &validation,
        )
        .map_err(|e| {
            warn!("Token verification failed: {}", e);
            PipelineError::InvalidCredential
        })?;

        let principal = data.claims.sub;
        if principal.trim().is_empty() {
            return Err(PipelineError::InvalidCredential);
        }

        self.check_allow_list(&principal)?;

        Ok(AuthIdentity {
            principal,
            issued_at: Utc
                .timestamp_opt(data.claims.iat, 0)
                .single()
                .unwrap_or_else(Utc::now),
            expires_at: Utc
                .timestamp_opt(data.claims.exp, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    /// Verify a platform-signed login payload and return the embedded
    /// identity. See the module docs for the check-string construction.
    pub fn verify_login_payload(&self, init_data: &str) -> Result<LoginIdentity, PipelineError> {
        self.verify_login_payload_at(init_data, Utc::now().timestamp())
    }

    fn verify_login_payload_at(
        &self,
        init_data: &str,
        now: i64,
    ) -> Result<LoginIdentity, PipelineError> {
        let platform_token = self
            .config
            .platform_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration("platform token is not configured".to_string())
            })?;

        let mut fields = parse_init_data(init_data);
        let provided_hash = fields.remove("hash").ok_or(PipelineError::InvalidCredential)?;

        // Canonical check string: `key=value` lines sorted by key.
        let check_string = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        // Secret derivation with a fixed domain-separation label, then an
        // HMAC over the check string, compared in constant time.
        let mut secret_mac = HmacSha256::new_from_slice(LOGIN_SECRET_LABEL)
            .map_err(|_| PipelineError::InvalidCredential)?;
        secret_mac.update(platform_token.as_bytes());
        let secret = secret_mac.finalize().into_bytes();

        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|_| PipelineError::InvalidCredential)?;
        mac.update(check_string.as_bytes());

        let provided = hex::decode(provided_hash.as_bytes())
            .map_err(|_| PipelineError::InvalidCredential)?;
        mac.verify_slice(&provided).map_err(|_| {
            warn!("Login payload signature mismatch");
            PipelineError::InvalidCredential
        })?;

        // Bound replay risk: reject payloads older than the configured age.
        let auth_date: i64 = fields
            .get("auth_date")
            .and_then(|v| v.parse().ok())
            .ok_or(PipelineError::InvalidCredential)?;
        if now.saturating_sub(auth_date) > self.config.login_max_age_secs as i64 {
            warn!("Login payload is too old (auth_date={})", auth_date);
            return Err(PipelineError::InvalidCredential);
        }

        let user: PlatformUser = fields
            .get("user")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .ok_or(PipelineError::InvalidCredential)?;

        let principal = user
            .username
            .as_deref()
            .map(str::to_lowercase)
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::InvalidCredential)?;

        self.check_allow_list(&principal)?;

        debug!("Login payload verified for: {}", principal);
        Ok(LoginIdentity {
            principal,
            user,
            auth_date,
        })
    }

    /// Principals absent from the allow-list are authenticated but not
    /// authorized. An empty allow-list denies everyone.
    fn check_allow_list(&self, principal: &str) -> Result<(), PipelineError> {
        let allowed = self
            .config
            .allowed_principals
            .iter()
            .any(|p| p.eq_ignore_ascii_case(principal));
        if allowed {
            Ok(())
        } else {
            warn!("Principal not in allow-list: {}", principal);
            Err(PipelineError::AccessDenied(format!(
                "principal '{}' is not allowed",
                principal
            )))
        }
    }
}

/// Parse percent-encoded `key=value` pairs, keeping blank values.
fn parse_init_data(init_data: &str) -> BTreeMap<String, String> {
    init_data
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(key).map(|k| k.into_owned()).unwrap_or_else(|_| key.to_string()),
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string()),
            )
        })
        .collect()
}
