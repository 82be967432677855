use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use tracing::error;

use crate::error::ApiError;
use crate::models::Id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: usize,
}

/// Issues and verifies bearer tokens whose subject is a user id.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self { secret: secret.into(), ttl }
    }

    pub fn issue(&self, user_id: Id) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = (chrono::Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims { sub: user_id.to_string(), exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
    }

    /// Validate signature and expiry and recover the user id.
    pub fn verify(&self, token: &str) -> Result<(Id, Claims), ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)
            .map_err(|_| ApiError::Unauthenticated)?;
        let id = data.claims.sub.parse::<Id>().map_err(|_| ApiError::Unauthenticated)?;
        Ok((id, data.claims))
    }
}

/// Extractor yielding the authenticated user.
#[derive(Debug, Clone)]
pub struct Auth {
    pub user_id: Id,
}

impl FromRequest for Auth {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(issuer) = req.app_data::<web::Data<TokenIssuer>>() else {
            error!("TokenIssuer missing from app data");
            return ready(Err(ApiError::Internal.into()));
        };
        // Delegate to BearerAuth to parse the header.
        let result = match BearerAuth::from_request(req, pl).into_inner() {
            Ok(bearer) => issuer
                .verify(bearer.token())
                .map(|(user_id, _)| Auth { user_id }),
            Err(_) => Err(ApiError::Unauthenticated),
        };
        ready(result.map_err(Into::into))
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)?;
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
