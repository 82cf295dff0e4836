use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    db::{to_document, DocumentStore, StoreError, AUDIT_LOGS},
    model::audit::AuditEvent,
};

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends `event` and returns its id.
    async fn append(&self, event: AuditEvent) -> Result<String, StoreError>;
}

/// Writes audit events into the `audit_logs` collection.
#[derive(Clone)]
pub struct StoreAuditSink {
    store: Arc<dyn DocumentStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<String, StoreError> {
        let doc = to_document(&event)?;
        self.store.create(AUDIT_LOGS, doc).await
    }
}
