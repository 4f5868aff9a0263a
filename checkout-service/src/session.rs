use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CheckoutError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    General,
    Farmer,
    Buyer,
    Expert,
    Teacher,
    Weather,
    Admin,
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(UserRole::General),
            "farmer" => Ok(UserRole::Farmer),
            "buyer" => Ok(UserRole::Buyer),
            "expert" => Ok(UserRole::Expert),
            "teacher" => Ok(UserRole::Teacher),
            "weather" => Ok(UserRole::Weather),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserRole::General => "general",
            UserRole::Farmer => "farmer",
            UserRole::Buyer => "buyer",
            UserRole::Expert => "expert",
            UserRole::Teacher => "teacher",
            UserRole::Weather => "weather",
            UserRole::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// The caller on whose behalf a flow operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Access-token claims as issued by the identity store.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    pub exp: usize,
}

pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Session, CheckoutError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| CheckoutError::Unauthorized(format!("invalid access token: {}", e)))?;
        let claims = data.claims;
        // Profiles without a recognised role fall back to the general role.
        let role = claims
            .user_metadata
            .role
            .as_deref()
            .and_then(|role| role.parse().ok())
            .unwrap_or_default();
        Ok(Session {
            user_id: claims.sub,
            email: claims.email,
            role,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    Arc<SessionVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = CheckoutError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| CheckoutError::Unauthorized("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| CheckoutError::Unauthorized("missing bearer token".to_string()))?;

        Arc::<SessionVerifier>::from_ref(state).verify(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, role: Option<&str>, exp: usize) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let claims = Claims {
            sub: user_id,
            email: Some("grower@example.com".to_string()),
            user_metadata: UserMetadata {
                role: role.map(str::to_string),
            },
            exp,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (user_id, token)
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn verifies_identity_and_role() {
        let verifier = SessionVerifier::new("secret");
        let (user_id, token) = token("secret", Some("farmer"), far_future());
        let session = verifier.verify(&token).unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.role, UserRole::Farmer);
        assert_eq!(session.email.as_deref(), Some("grower@example.com"));
    }

    #[test]
    fn unknown_role_falls_back_to_general() {
        let verifier = SessionVerifier::new("secret");
        let (_, token) = token("secret", Some("authenticated"), far_future());
        assert_eq!(verifier.verify(&token).unwrap().role, UserRole::General);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let verifier = SessionVerifier::new("secret");
        let (_, forged) = token("other", None, far_future());
        assert!(matches!(verifier.verify(&forged), Err(CheckoutError::Unauthorized(_))));

        let (_, expired) = token("secret", None, 1_000);
        assert!(matches!(verifier.verify(&expired), Err(CheckoutError::Unauthorized(_))));
    }
}
