//! services/api/src/web/auth.rs
//!
//! Bearer-token verification. Every protected request goes through
//! `TokenVerifier::verify`, which accepts either a guest token (when guest
//! mode is on) or an HS256 session token signed with `SESSION_SECRET`.
//!
//! Guest owner ids live under `GUEST_PREFIX`. Signed subjects carrying that
//! prefix are refused, so an unsigned guest token can never resolve to an
//! account that holds a signed session.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use receipt_pipeline_core::OwnerIdentity;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;

/// Namespace for the owner ids of guest sessions.
pub const GUEST_PREFIX: &str = "guest:";

//=========================================================================================
// Claims
//=========================================================================================

/// The claims carried by a signed session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// The owner id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// What can be read from a token before its signature is checked.
#[derive(Deserialize)]
struct UnverifiedPayload {
    #[serde(default)]
    guest: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn peek_payload(token: &str) -> Option<UnverifiedPayload> {
    let payload = token.split('.').nth(1)?;
    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&raw).ok()
}

//=========================================================================================
// The Verifier
//=========================================================================================

#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    allow_guest: bool,
}

impl TokenVerifier {
    pub fn new(secret: &str, allow_guest: bool) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            allow_guest,
        }
    }

    /// Resolves a bearer token to the calling owner.
    pub fn verify(&self, token: &str) -> Result<OwnerIdentity, ApiError> {
        if let Some(payload) = peek_payload(token).filter(|p| p.guest) {
            if !self.allow_guest {
                warn!("Guest token presented while guest mode is disabled");
                return Err(ApiError::Unauthorized);
            }
            let sub = payload
                .sub
                .filter(|s| !s.trim().is_empty())
                .ok_or(ApiError::Unauthorized)?;
            let owner_id = format!("{GUEST_PREFIX}{sub}");
            debug!(owner_id = %owner_id, "Guest session accepted");
            return Ok(OwnerIdentity {
                owner_id,
                email: payload.email,
                name: payload.name,
                picture: None,
                guest: true,
            });
        }

        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                debug!(error = %e, "Session token rejected");
                ApiError::Unauthorized
            })?;
        let claims = data.claims;
        if claims.sub.trim().is_empty() || claims.sub.starts_with(GUEST_PREFIX) {
            return Err(ApiError::Unauthorized);
        }
        Ok(OwnerIdentity {
            owner_id: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
            guest: false,
        })
    }

    /// Signs a session token for `identity`, valid for `ttl`.
    pub fn issue(&self, identity: &OwnerIdentity, ttl: chrono::Duration) -> Result<String, ApiError> {
        let claims = SessionClaims {
            sub: identity.owner_id.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            picture: identity.picture.clone(),
            exp: (Utc::now() + ttl).timestamp().max(0) as u64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("could not sign session token: {}", e)))
    }
}
