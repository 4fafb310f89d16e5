//! Caller identity for the HTTP API.
//!
//! A bearer token is resolved to a [`Caller`] by an [`IdentityProvider`].
//! Only the configured administrator may run pipeline operations; the
//! check lives in the server's `Admin` extractor.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{AdminConfig, AuthConfig};

/// An authenticated API caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub email: String,
}

impl Caller {
    /// Email comparison is trimmed and case-insensitive.
    pub fn is_admin(&self, admin: &AdminConfig) -> bool {
        self.email.trim().eq_ignore_ascii_case(admin.email.trim())
    }
}

/// Resolves bearer tokens to callers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when the token is unknown.
    async fn resolve(&self, token: &str) -> Option<Caller>;
}

/// Token table from `[auth.tokens]`.
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn from_config(auth: &AuthConfig) -> Self {
        Self {
            tokens: auth.tokens.clone(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokens {
    async fn resolve(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token.trim()).map(|email| Caller {
            email: email.clone(),
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
