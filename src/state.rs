use std::sync::Arc;

use crate::{
    audit::{AuditSink, StoreAuditSink},
    auth::TokenService,
    db::DocumentStore,
    device::DeviceResolver,
    ws::ClipboardHub,
};

/// Everything a request handler needs, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub tokens: Arc<TokenService>,
    pub devices: DeviceResolver,
    pub audit: Arc<dyn AuditSink>,
    pub hub: ClipboardHub,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tokens: TokenService,
        trust_forwarded_for: bool,
    ) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditSink::new(store.clone()));
        Self {
            devices: DeviceResolver::new(store.clone(), audit.clone()),
            tokens: Arc::new(tokens),
            hub: ClipboardHub::new(),
            store,
            audit,
            trust_forwarded_for,
        }
    }
}

#[cfg(test)]
pub fn test_state(store: Arc<crate::db::memory::MemoryStore>) -> AppState {
    AppState::new(
        store,
        TokenService::new("test-secret", chrono::Duration::minutes(30)),
        false,
    )
}
