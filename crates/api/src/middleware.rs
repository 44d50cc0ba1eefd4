use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use voucherflow_core::{DomainError, UserId};

use crate::context::CallerContext;

/// Maps a bearer token to the user it was issued to.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<UserId>;
}

/// Fixed token table, configured through `API_TOKENS`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    /// Parse `token=user-uuid` pairs separated by commas.
    pub fn parse(spec: &str) -> Result<Self, DomainError> {
        let mut resolver = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, user) = entry
                .split_once('=')
                .ok_or_else(|| DomainError::validation(format!("malformed token entry `{entry}`")))?;
            let token = token.trim();
            if token.is_empty() {
                return Err(DomainError::validation("token must not be blank"));
            }
            resolver = resolver.with_token(token, user.trim().parse()?);
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl SessionResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<dyn SessionResolver>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let user_id = state.sessions.resolve(token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(CallerContext::new(user_id));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
