//! creds — scoped bearer credentials guarding a small user registry.
//!
//! Library crate shared by the `creds` binary and the integration tests in `tests/`.

use std::sync::Arc;

pub mod api;
pub mod authorizer;
pub mod cli;
pub mod config;
pub mod errors;
pub mod issuer;
pub mod models;
pub mod store;

use authorizer::Authorizer;
use issuer::Issuer;
use store::Store;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub authorizer: Authorizer,
    pub issuer: Issuer,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, admin_scope: &str) -> Self {
        let authorizer = Authorizer::new(store.clone(), admin_scope);
        let issuer = Issuer::new(store.clone(), authorizer.clone());
        Self {
            store,
            authorizer,
            issuer,
        }
    }
}
