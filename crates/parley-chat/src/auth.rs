use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::models::Role;

use crate::error::{ChatError, ChatResult};

/// Caller identity decoded from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

/// Stateless bearer-token verification in front of every REST call and socket.
#[derive(Clone)]
pub struct AuthGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl AuthGate {
    pub fn new(secret: &str, ttl: chrono::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, identity: &Identity) -> ChatResult<String> {
        let now = chrono::Utc::now();
        let expires = now.checked_add_signed(self.ttl).ok_or_else(|| {
            ChatError::Internal(anyhow::anyhow!("token lifetime {} overflows the clock", self.ttl))
        })?;
        let claims = Claims {
            sub: identity.id,
            username: identity.username.clone(),
            role: identity.role,
            iat: now.timestamp() as usize,
            exp: expires.timestamp() as usize,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ChatError::Internal(e.into()))?;
        Ok(token)
    }

    /// `None` or an empty token is `Unauthorized`; anything that fails to decode,
    /// carries a bad signature or has expired is `InvalidCredential`.
    pub fn verify(&self, token: Option<&str>) -> ChatResult<Identity> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ChatError::Unauthorized)?;

        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|_| ChatError::InvalidCredential)?;

        Ok(Identity {
            id: data.claims.sub,
            username: data.claims.username,
            role: data.claims.role,
        })
    }

    /// Verify the raw value of an `Authorization: Bearer <token>` header.
    pub fn verify_header(&self, header: Option<&str>) -> ChatResult<Identity> {
        let header = header.ok_or(ChatError::Unauthorized)?;
        // Scheme names are case-insensitive
        let (scheme, token) = header
            .split_once(' ')
            .ok_or(ChatError::InvalidCredential)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(ChatError::InvalidCredential);
        }
        self.verify(Some(token))
    }
}
