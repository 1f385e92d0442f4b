//! Scope check for presented bearer tokens.
//!
//! The same predicate is evaluated pre-flight against the store and again
//! inside the transaction that performs a mutation, so a token revoked in
//! between cannot be used to write.

use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }

    fn from_lookup(found: bool) -> Self {
        if found {
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }
}

/// Extract the token id from `Authorization: Bearer <uuid>`.
/// Anything else (no header, another scheme, a non-UUID value) yields `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| Uuid::parse_str(t.trim()).ok())
}

/// Shortened token id for log lines.
pub fn mask(token: Option<Uuid>) -> String {
    match token {
        Some(id) => {
            let s = id.simple().to_string();
            format!("{}…{}", &s[..4], &s[s.len() - 4..])
        }
        None => "<none>".to_string(),
    }
}

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn Store>,
    admin_scope: Arc<str>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn Store>, admin_scope: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            admin_scope: admin_scope.into(),
        }
    }

    pub fn admin_scope(&self) -> &str {
        &self.admin_scope
    }

    pub async fn authorize(&self, presented: Option<Uuid>, required_scope: &str) -> Decision {
        let Some(token_id) = presented else {
            return Decision::Denied;
        };
        Decision::from_lookup(self.store.token_has_scope(token_id, required_scope).await)
    }

    /// Pre-flight check against the configured admin scope.
    pub async fn authorize_admin(&self, presented: Option<Uuid>) -> Decision {
        self.authorize(presented, &self.admin_scope).await
    }

    /// Admin check evaluated inside an open transaction.
    pub async fn reauthorize_admin(&self, tx: &mut dyn StoreTx, presented: Option<Uuid>) -> Decision {
        let Some(token_id) = presented else {
            return Decision::Denied;
        };
        Decision::from_lookup(tx.token_has_scope(token_id, &self.admin_scope).await)
    }
}
