//! In-memory store used by dry runs and tests.
//!
//! Mirrors the unique constraints of the `leads` table so that identifier
//! clashes surface as [`AppError::Conflict`], like they do in PostgreSQL.

use crate::dedup::DedupKey;
use crate::errors::AppError;
use crate::models::{ImportLog, ImportLogEntry, Lead, LeadDetails, NormalizedLead};
use crate::store::{AuditLogSink, LeadStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: Mutex<Vec<Lead>>,
    fail_writes: AtomicBool,
    rejected_names: Mutex<HashSet<String>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with leads; ids are kept as given.
    pub fn with_leads(leads: Vec<Lead>) -> Self {
        Self {
            leads: Mutex::new(leads),
            ..Default::default()
        }
    }

    /// Makes every insert and update fail as if the database were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Rejects inserts of leads with this legal name.
    pub async fn reject_inserts_named(&self, razao_social: &str) {
        self.rejected_names
            .lock()
            .await
            .insert(razao_social.to_string());
    }

    pub async fn snapshot(&self) -> Vec<Lead> {
        self.leads.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.leads.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leads.lock().await.is_empty()
    }

    fn check_writes(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("store unavailable".to_string()));
        }
        Ok(())
    }
}

fn matches_key(lead: &Lead, key: &DedupKey) -> bool {
    match key {
        DedupKey::Cnpj(cnpj) => lead.cnpj.as_deref() == Some(cnpj.as_str()),
        DedupKey::Telefone(telefone) => lead.telefone.as_deref() == Some(telefone.as_str()),
        DedupKey::RazaoCidadeUf {
            razao_social,
            municipio,
            uf,
        } => {
            let upper_trim = |v: Option<&str>| v.unwrap_or("").trim().to_uppercase();
            upper_trim(Some(lead.razao_social.as_str())) == *razao_social
                && upper_trim(lead.details.municipio.as_deref()) == *municipio
                && lead.details.uf.as_deref().unwrap_or("") == uf.as_str()
        }
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Lead>, AppError> {
        let leads = self.leads.lock().await;
        Ok(leads.iter().find(|lead| matches_key(lead, key)).cloned())
    }

    async fn insert(&self, lead: &NormalizedLead) -> Result<i64, AppError> {
        self.check_writes()?;
        if self.rejected_names.lock().await.contains(&lead.razao_social) {
            return Err(AppError::BadRequest(format!(
                "insert rejected for {}",
                lead.razao_social
            )));
        }

        let mut leads = self.leads.lock().await;
        for key in DedupKey::identifier_keys(lead) {
            if leads.iter().any(|existing| matches_key(existing, &key)) {
                return Err(AppError::Conflict(format!("{} already exists", key)));
            }
        }

        let id = leads.iter().map(|l| l.id).max().unwrap_or(0) + 1;
        leads.push(Lead::from_insert(id, lead));
        Ok(id)
    }

    async fn update_details(&self, id: i64, details: &LeadDetails) -> Result<(), AppError> {
        self.check_writes()?;
        let mut leads = self.leads.lock().await;
        let lead = leads
            .iter_mut()
            .find(|lead| lead.id == id)
            .ok_or_else(|| AppError::NotFound(format!("lead {} not found", id)))?;
        if !lead.details.fill_missing_from(details).is_empty() {
            lead.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_by_identifiers(
        &self,
        cnpjs: &[String],
        telefones: &[String],
    ) -> Result<Vec<Lead>, AppError> {
        let leads = self.leads.lock().await;
        Ok(leads
            .iter()
            .filter(|lead| {
                lead.cnpj.as_ref().is_some_and(|c| cnpjs.contains(c))
                    || lead.telefone.as_ref().is_some_and(|t| telefones.contains(t))
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<ImportLogEntry>>,
    failing: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<ImportLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLogSink for InMemoryAuditLog {
    async fn append(&self, entry: &ImportLogEntry) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("audit log unavailable".to_string()));
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ImportLog>, AppError> {
        let entries = self.entries.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(entries
            .iter()
            .enumerate()
            .rev()
            .take(limit)
            .map(|(idx, e)| ImportLog {
                id: idx as i64 + 1,
                arquivo_nome: e.arquivo_nome.clone(),
                arquivo_sha256: e.arquivo_sha256.clone(),
                total_linhas: e.total_linhas,
                novos_inseridos: e.novos_inseridos,
                duplicados_ignorados: e.duplicados_ignorados,
                duplicados_atualizados: e.duplicados_atualizados,
                erros_total: e.erros_total,
                tempo_processamento_ms: e.tempo_processamento_ms,
                criado_em: e.criado_em,
                criado_por: e.criado_por,
            })
            .collect())
    }
}
