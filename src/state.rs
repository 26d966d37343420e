//! Shared state handed to every handler.

use crate::{auth::TokenVerifier, services::file_registry::Registry};
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub tokens: TokenVerifier,
}

impl FromRef<AppState> for Registry {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<AppState> for TokenVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}
