//! Caller identity, resolved once per request.

use std::collections::HashMap;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::chat::core::config::AuthConfig;
use crate::chat::core::ids::UserId;

/// Maps request headers to a user.
pub trait IdentityProvider: Send + Sync {
    /// The authenticated user, if any.
    fn identify(&self, headers: &HeaderMap) -> Option<UserId>;
}

/// Static bearer tokens from configuration.
#[derive(Clone, Debug, Default)]
pub struct BearerTokenAuth {
    tokens: HashMap<String, UserId>,
}

impl BearerTokenAuth {
    /// Build from the configured `token=user` pairs.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|identity| (identity.token.clone(), identity.user_id))
            .collect();
        Self { tokens }
    }

    /// Whether no token is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for BearerTokenAuth {
    fn identify(&self, headers: &HeaderMap) -> Option<UserId> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        self.tokens.get(token.trim()).copied()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::chat::core::config::TokenIdentity;

    fn auth(user: UserId) -> BearerTokenAuth {
        BearerTokenAuth::from_config(&AuthConfig {
            tokens: vec![TokenIdentity {
                token: "s3cret".to_string(),
                user_id: user,
            }],
        })
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn known_token_identifies_its_user() {
        let user = UserId::new();
        assert_eq!(auth(user).identify(&headers("Bearer s3cret")), Some(user));
        assert_eq!(auth(user).identify(&headers("bearer s3cret")), Some(user));
    }

    #[test]
    fn missing_or_unknown_credentials_have_no_identity() {
        let auth = auth(UserId::new());
        assert_eq!(auth.identify(&HeaderMap::new()), None);
        assert_eq!(auth.identify(&headers("Bearer nope")), None);
        assert_eq!(auth.identify(&headers("Basic s3cret")), None);
    }
}
