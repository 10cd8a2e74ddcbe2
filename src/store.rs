//! Storage seams used by the importer.
//!
//! The importer never talks to a database directly: it is handed a
//! [`LeadStore`] and an [`AuditLogSink`] by its caller.
//! `db_storage` provides the PostgreSQL implementations and
//! `memory_store` the in-memory ones.

use crate::dedup::DedupKey;
use crate::errors::AppError;
use crate::models::{ImportLog, ImportLogEntry, Lead, LeadDetails, NormalizedLead};
use async_trait::async_trait;

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Short name for logs.
    fn backend_tag(&self) -> &'static str;

    /// Finds the stored lead matching a deduplication key.
    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Lead>, AppError>;

    /// Inserts a new lead with status `novo` and returns its id.
    async fn insert(&self, lead: &NormalizedLead) -> Result<i64, AppError>;

    /// Fills the descriptive fields of a lead that are still empty in the
    /// store; populated fields keep their stored value even when `details`
    /// was built from an older copy. Identity and business state columns are
    /// never written.
    async fn update_details(&self, id: i64, details: &LeadDetails) -> Result<(), AppError>;

    /// Every lead whose CNPJ is in `cnpjs` or whose phone is in `telefones`.
    async fn list_by_identifiers(
        &self,
        cnpjs: &[String],
        telefones: &[String],
    ) -> Result<Vec<Lead>, AppError>;
}

#[async_trait]
pub trait AuditLogSink: Send + Sync {
    async fn append(&self, entry: &ImportLogEntry) -> Result<(), AppError>;

    /// Most recent entries first.
    async fn recent(&self, limit: i64) -> Result<Vec<ImportLog>, AppError>;
}
