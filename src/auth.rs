// src/auth.rs
//! Identity verification: an opaque signed token in, a subject id out.
//!
//! Tokens are HS256 JWTs signed with the shared `JWT_SECRET`. The subject is
//! read from the `id` claim, falling back to the standard `sub` claim. `exp` is
//! enforced when the token carries one.

use super::{error::AuthError, types::SubjectId};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    id: Option<String>,
    sub: Option<String>,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // issued tokens may omit exp entirely
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Stateless check. No retries: a rejection is final for this attempt.
    pub fn verify(&self, token: &str) -> Result<SubjectId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e),
            },
        )?;

        let Claims { id, sub } = data.claims;
        id.or(sub)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)
    }
}
