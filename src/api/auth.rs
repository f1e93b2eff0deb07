//! Pre-shared key authentication
//!
//! Keys come from an optional JSON file mapping a request path (or the
//! literal `"POST"`) to a key:
//!
//! ```json
//! { "/barrier/1": "k1", "/barrier/2": "k2", "POST": "admin-key" }
//! ```
//!
//! With no keys configured everything is open. Otherwise every POST needs
//! `Authorization: Bearer <POST key>` and a barrier connection needs
//! `Authorization: <key for its path>`.

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::error::ApiError;

const POST_KEY: &str = "POST";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKeys(HashMap<String, String>);

impl ApiKeys {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keys file {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Failed to parse keys file {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn is_enabled(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the raw `Authorization` value of a barrier connection to `path`
    pub fn check_barrier(&self, path: &str, headers: &HeaderMap) -> Result<(), ApiError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let key = self
            .0
            .get(path)
            .ok_or_else(|| ApiError::Unauthorized(format!("no key configured for {}", path)))?;
        match authorization(headers) {
            Some(given) if given == key => Ok(()),
            _ => Err(ApiError::Unauthorized("invalid key".to_string())),
        }
    }

    /// Check the bearer token of a POST request
    pub fn check_post(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let key = self
            .0
            .get(POST_KEY)
            .ok_or_else(|| ApiError::Unauthorized("no POST key configured".to_string()))?;
        match authorization(headers).and_then(|v| v.strip_prefix("Bearer ")) {
            Some(token) if token == key => Ok(()),
            Some(_) => Err(ApiError::Unauthorized("invalid key".to_string())),
            None => Err(ApiError::Unauthorized("missing Bearer token".to_string())),
        }
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Axum middleware requiring the POST key on every POST request.
pub async fn require_post_key(
    State(keys): State<Arc<ApiKeys>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::POST {
        keys.check_post(request.headers())?;
    }
    Ok(next.run(request).await)
}
