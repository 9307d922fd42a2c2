use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use chrono::{TimeDelta, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::ADMIN_ROLE;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDelta,
}

impl TokenService {
    pub fn new(secret: &str, ttl_hours: i64) -> Result<Self, ApiError> {
        let ttl = TimeDelta::try_hours(ttl_hours)
            .ok_or_else(|| ApiError::Internal(format!("token lifetime of {ttl_hours}h is out of range")))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn issue(&self, username: &str, role: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| ApiError::Internal("token expiry overflows the calendar".to_string()))?;
        let claims = Claims {
            username: username.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

/// Claims of a verified admin bearer token. Extracting it guards a route.
#[derive(Debug, Clone)]
pub struct AdminClaims(pub Claims);

impl FromRequest for AdminClaims {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn authorize(req: &HttpRequest) -> Result<AdminClaims, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("application state missing".to_string()))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(' ').nth(1))
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.tokens.verify(token).map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        ApiError::Unauthorized
    })?;

    if claims.role != ADMIN_ROLE {
        return Err(ApiError::Unauthorized);
    }
    Ok(AdminClaims(claims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let tokens = TokenService::new("test-secret", 1).unwrap();
        let token = tokens.issue("admin", ADMIN_ROLE).unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issued = TokenService::new("one", 1).unwrap().issue("admin", ADMIN_ROLE).unwrap();
        assert!(TokenService::new("two", 1).unwrap().verify(&issued).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("test-secret", -2).unwrap();
        let token = tokens.issue("admin", ADMIN_ROLE).unwrap();
        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let tokens = TokenService::new("test-secret", 1).unwrap();
        assert!(tokens.verify("not.a.token").is_err());
    }

    #[test]
    fn out_of_range_lifetime_is_an_error() {
        assert!(TokenService::new("test-secret", i64::MAX / 2).is_err());
    }

    #[test]
    fn issue_reports_calendar_overflow() {
        // Within TimeDelta's range but far past the last representable date.
        let tokens = TokenService::new("test-secret", 100_000_000_000).unwrap();
        let err = tokens.issue("admin", ADMIN_ROLE).unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn credentials_must_match_exactly() {
        let creds = AdminCredentials::new("admin", "admin123");
        assert!(creds.matches("admin", "admin123"));
        assert!(!creds.matches("admin", "admin1234"));
        assert!(!creds.matches("Admin", "admin123"));
    }
}
