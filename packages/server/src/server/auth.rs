//! Caller authentication.
//!
//! Modes: `none`, `api_key` (header whitelist + key->user map), `jwt`
//! (bearer token against the configured verifier), and `hybrid` (API key
//! first, JWT fallback). JWT principals additionally pass an allow policy:
//! exact users, then email domains, then regexes. `/metrics` and `/health`
//! sit outside the authenticated surface on purpose.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::common::ApiError;
use crate::config::AuthMode;
use crate::Settings;

/// The authenticated caller attached to request extensions.
#[derive(Debug, Clone)]
pub struct Principal {
    pub method: &'static str,
    pub user: Option<String>,
}

impl Principal {
    fn anonymous() -> Self {
        Self {
            method: "none",
            user: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iss: String,
    pub exp: i64,
}

/// HMAC JWT verifier: token in, claims out. Policy lives in the caller.
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Mint a token; used by operator tooling and the test suite.
    pub fn create_token(
        &self,
        sub: &str,
        email: Option<String>,
        ttl: std::time::Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: sub.to_string(),
            email,
            iss: self.issuer.clone(),
            exp: Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

/// Authenticate one request against the configured mode.
pub fn authenticate(
    settings: &Settings,
    jwt: &Arc<JwtService>,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    match settings.auth_mode {
        AuthMode::None => Ok(Principal::anonymous()),
        AuthMode::ApiKey => api_key_auth(settings, headers),
        AuthMode::Jwt => jwt_auth(settings, jwt, headers),
        AuthMode::Hybrid => {
            api_key_auth(settings, headers).or_else(|_| jwt_auth(settings, jwt, headers))
        }
    }
}

fn api_key_auth(settings: &Settings, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let users = settings.api_key_users().unwrap_or_default();
    for header in &settings.api_key_headers {
        if let Some(key) = headers.get(header).and_then(|value| value.to_str().ok()) {
            if let Some(user) = users.get(key) {
                return Ok(Principal {
                    method: "api_key",
                    user: Some(user.clone()),
                });
            }
        }
    }
    let header_names = settings
        .api_key_headers
        .iter()
        .map(|header| format!("'{header}'"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ApiError::Unauthorized(format!(
        "missing or invalid API key; requires one of these headers: {header_names}"
    )))
}

fn jwt_auth(
    settings: &Settings,
    jwt: &Arc<JwtService>,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid Bearer token".to_string()))?;

    let claims = jwt
        .verify_token(token)
        .map_err(|e| ApiError::Unauthorized(format!("invalid JWT token: {e}")))?;

    let user = claims.email.clone().unwrap_or_else(|| claims.sub.clone());
    if !allowlist_permits(settings, &user, claims.email.as_deref()) {
        return Err(ApiError::Unauthorized(format!(
            "access denied: '{user}' not permitted by policy"
        )));
    }

    tracing::info!(user = %user, "JWT validated");
    Ok(Principal {
        method: "jwt",
        user: Some(user),
    })
}

/// The allow policy for verified callers. Precedence: exact users, then
/// email domains, then regexes; an empty policy permits everyone.
pub fn allowlist_permits(settings: &Settings, user: &str, email: Option<&str>) -> bool {
    if settings.allowed_users.is_empty()
        && settings.allowed_domains.is_empty()
        && settings.allowed_user_regex.is_empty()
    {
        return true;
    }

    let canonical = user.to_lowercase();
    if settings
        .allowed_users
        .iter()
        .any(|allowed| allowed.to_lowercase() == canonical)
    {
        return true;
    }

    let email_like = email
        .filter(|email| email.contains('@'))
        .or_else(|| user.contains('@').then_some(user));
    if let Some(email) = email_like {
        if let Some(domain) = email.rsplit('@').next() {
            let domain = domain.to_lowercase();
            if settings
                .allowed_domains
                .iter()
                .any(|allowed| allowed.to_lowercase() == domain)
            {
                return true;
            }
        }
    }

    settings.allowed_user_regex.iter().any(|pattern| {
        regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|regex| {
                regex.is_match(&canonical)
                    || email_like.map_or(false, |email| regex.is_match(email))
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn jwt() -> Arc<JwtService> {
        Arc::new(JwtService::new("test-secret", "patchbay".to_string()))
    }

    fn settings(mode: AuthMode) -> Settings {
        Settings {
            auth_mode: mode,
            api_keys: vec!["sekrit:alice".to_string()],
            jwt_secret: "test-secret".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn none_mode_admits_everyone() {
        let principal = authenticate(&settings(AuthMode::None), &jwt(), &HeaderMap::new()).unwrap();
        assert_eq!(principal.method, "none");
        assert!(principal.user.is_none());
    }

    #[test]
    fn api_key_mode_maps_key_to_user() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", "sekrit".parse().unwrap());
        let principal = authenticate(&settings(AuthMode::ApiKey), &jwt(), &headers).unwrap();
        assert_eq!(principal.method, "api_key");
        assert_eq!(principal.user.as_deref(), Some("alice"));
    }

    #[test]
    fn api_key_mode_rejects_missing_key() {
        let err = authenticate(&settings(AuthMode::ApiKey), &jwt(), &HeaderMap::new()).unwrap_err();
        assert!(err.to_string().contains("X-API-Key"));
    }

    #[test]
    fn jwt_round_trip_and_issuer_check() {
        let service = jwt();
        let token = service
            .create_token("bob", Some("bob@example.net".into()), Duration::from_secs(60))
            .unwrap();
        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "bob");

        let other = JwtService::new("test-secret", "someone-else".to_string());
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn hybrid_falls_back_to_jwt() {
        let service = jwt();
        let token = service
            .create_token("bob", None, Duration::from_secs(60))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());

        let principal = authenticate(&settings(AuthMode::Hybrid), &service, &headers).unwrap();
        assert_eq!(principal.method, "jwt");
        assert_eq!(principal.user.as_deref(), Some("bob"));
    }

    #[test]
    fn allowlist_precedence() {
        let mut settings = settings(AuthMode::Jwt);

        // Empty policy permits everyone.
        assert!(allowlist_permits(&settings, "anyone", None));

        settings.allowed_users = vec!["Alice@Example.net".to_string()];
        assert!(allowlist_permits(&settings, "alice@example.net", None));
        assert!(!allowlist_permits(&settings, "mallory@example.net", None));

        settings.allowed_domains = vec!["example.org".to_string()];
        assert!(allowlist_permits(&settings, "bob", Some("bob@example.org")));
        assert!(!allowlist_permits(&settings, "bob", Some("bob@evil.example")));

        settings.allowed_user_regex = vec![r"^svc-.*$".to_string()];
        assert!(allowlist_permits(&settings, "svc-backup", None));
        assert!(!allowlist_permits(&settings, "intruder", None));
    }
}
