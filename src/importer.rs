//! Batch import of lead spreadsheets.
//!
//! One pass over the rows in file order:
//! 1. Reading: the file is decoded into raw rows (fatal on failure)
//! 2. Normalizing: every row is validated into a lead or a row error
//! 3. Resolving: each lead is matched by its dedup key and inserted, merged or skipped
//! 4. Reporting: counters are returned and an audit entry is appended
//!
//! Rows are resolved strictly one after another. Row-level failures end up in
//! the report and never abort the batch.

use crate::dedup::{dedup_key, DedupKey, DedupKind};
use crate::errors::AppError;
use crate::merge::merge_lead;
use crate::models::{ErrorDetail, ImportLogEntry, ImportReport, Lead, NormalizedLead, RawRow};
use crate::spreadsheet::{file_digest, read_rows};
use crate::store::{AuditLogSink, LeadStore};
use crate::validator::build_lead;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Spreadsheet line of the data row at `index`; the header is line 1.
pub fn source_line(index: usize) -> usize {
    index + 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Reading,
    Normalizing,
    Resolving,
    Reporting,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportPhase::Reading => "reading",
            ImportPhase::Normalizing => "normalizing",
            ImportPhase::Resolving => "resolving",
            ImportPhase::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// How existing leads are looked up.
///
/// Both strategies yield the same report; `Prefetch` bounds store round trips
/// by the number of chunks instead of the number of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// One `find_by_key` per distinct key.
    PerRow,
    /// Bulk-load every lead sharing a CNPJ or phone with the batch, `chunk_size`
    /// identifiers per query.
    Prefetch { chunk_size: usize },
}

impl LookupStrategy {
    /// `0` selects per-row lookups.
    pub fn from_chunk_size(chunk_size: usize) -> Self {
        if chunk_size == 0 {
            LookupStrategy::PerRow
        } else {
            LookupStrategy::Prefetch { chunk_size }
        }
    }
}

/// Cooperative cancellation handle. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct ImportCancellation(Arc<AtomicBool>);

impl ImportCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Rows of one file plus the metadata recorded in the audit log.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub arquivo_nome: String,
    pub rows: Vec<RawRow>,
    pub arquivo_sha256: Option<String>,
    pub imported_by: Option<Uuid>,
}

impl ImportRequest {
    pub fn new(arquivo_nome: impl Into<String>, rows: Vec<RawRow>) -> Self {
        Self {
            arquivo_nome: arquivo_nome.into(),
            rows,
            arquivo_sha256: None,
            imported_by: None,
        }
    }

    pub fn imported_by(mut self, admin: Uuid) -> Self {
        self.imported_by = Some(admin);
        self
    }
}

/// What the batch knows about stored leads while resolving rows.
///
/// `leads` always holds the freshest copy of every lead this batch has seen
/// or written, so two keys reaching the same lead never merge into stale data.
struct BatchState {
    /// Keys already resolved in this batch → the lead they resolved to
    /// (`None` when the first occurrence could not be persisted).
    seen: HashMap<DedupKey, Option<i64>>,
    leads: HashMap<i64, Lead>,
    /// Identifier index, present only with [`LookupStrategy::Prefetch`].
    index: Option<HashMap<DedupKey, i64>>,
}

impl BatchState {
    fn new() -> Self {
        Self {
            seen: HashMap::new(),
            leads: HashMap::new(),
            index: None,
        }
    }

    fn remember(&mut self, lead: Lead) {
        if let Some(index) = self.index.as_mut() {
            for key in DedupKey::identifier_keys(&lead.to_normalized()) {
                index.insert(key, lead.id);
            }
        }
        self.leads.insert(lead.id, lead);
    }
}

/// Drives an import against injected store and audit collaborators.
#[derive(Clone)]
pub struct LeadImporter {
    store: Arc<dyn LeadStore>,
    audit: Arc<dyn AuditLogSink>,
    strategy: LookupStrategy,
}

impl LeadImporter {
    pub fn new(store: Arc<dyn LeadStore>, audit: Arc<dyn AuditLogSink>) -> Self {
        Self {
            store,
            audit,
            strategy: LookupStrategy::PerRow,
        }
    }

    pub fn with_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Decodes `bytes` and imports its rows.
    ///
    /// # Errors
    ///
    /// Only a file that cannot be read fails the call; nothing is processed
    /// and nothing is audited in that case. Row failures are in the report.
    pub async fn import_file(
        &self,
        bytes: Vec<u8>,
        arquivo_nome: &str,
        imported_by: Option<Uuid>,
        cancel: &ImportCancellation,
    ) -> Result<ImportReport, AppError> {
        tracing::info!("[{}] {} ({} bytes)", ImportPhase::Reading, arquivo_nome, bytes.len());

        let file_name = arquivo_nome.to_string();
        let (rows, digest) = tokio::task::spawn_blocking(move || {
            read_rows(&bytes, &file_name).map(|rows| (rows, file_digest(&bytes)))
        })
        .await
        .map_err(|e| AppError::InternalError(format!("spreadsheet reader crashed: {}", e)))??;

        let request = ImportRequest {
            arquivo_nome: arquivo_nome.to_string(),
            rows,
            arquivo_sha256: Some(digest),
            imported_by,
        };
        Ok(self.run(request, cancel).await)
    }

    /// Imports already decoded rows. Never fails: every problem is a row error.
    pub async fn run(&self, request: ImportRequest, cancel: &ImportCancellation) -> ImportReport {
        let started = Instant::now();
        let mut report = ImportReport::new(&request.arquivo_nome, request.rows.len());

        tracing::info!(
            "[{}] {} rows from {}",
            ImportPhase::Normalizing,
            request.rows.len(),
            request.arquivo_nome
        );
        let outcomes: Vec<Result<NormalizedLead, ErrorDetail>> = request
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| build_lead(row, source_line(idx)))
            .collect();

        let mut state = BatchState::new();
        if let LookupStrategy::Prefetch { chunk_size } = self.strategy {
            state.index = self.prefetch(&outcomes, chunk_size, &mut state.leads).await;
        }

        tracing::info!(
            "[{}] using {} store, {} lookups",
            ImportPhase::Resolving,
            self.store.backend_tag(),
            if state.index.is_some() { "prefetched" } else { "per-row" }
        );
        for (idx, (outcome, row)) in outcomes.into_iter().zip(&request.rows).enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "Import of {} cancelled after {} of {} rows",
                    request.arquivo_nome,
                    idx,
                    report.total_linhas
                );
                report.cancelado = true;
                break;
            }

            match outcome {
                Ok(lead) => {
                    self.resolve_row(&mut state, &mut report, lead, row, source_line(idx))
                        .await
                }
                Err(detail) => {
                    tracing::debug!("Row {} rejected: {}", detail.linha, detail.razao);
                    report.push_error(detail);
                }
            }

            if (idx + 1) % 500 == 0 {
                tracing::info!("Processed {}/{} rows", idx + 1, report.total_linhas);
            }
        }

        report.tempo_processamento_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            "[{}] {}: {} total, {} new, {} updated, {} ignored, {} errors in {}ms",
            ImportPhase::Reporting,
            request.arquivo_nome,
            report.total_linhas,
            report.novos_inseridos,
            report.duplicados_atualizados,
            report.duplicados_ignorados,
            report.erros_total,
            report.tempo_processamento_ms
        );

        let entry = ImportLogEntry::from_report(&report, request.arquivo_sha256, request.imported_by);
        if let Err(e) = self.audit.append(&entry).await {
            tracing::warn!("Failed to write import log for {}: {}", request.arquivo_nome, e);
        }

        report
    }

    /// Loads every stored lead sharing a CNPJ or phone with the batch.
    ///
    /// Returns `None` (per-row lookups) if the store cannot answer.
    async fn prefetch(
        &self,
        outcomes: &[Result<NormalizedLead, ErrorDetail>],
        chunk_size: usize,
        leads: &mut HashMap<i64, Lead>,
    ) -> Option<HashMap<DedupKey, i64>> {
        let mut cnpjs = BTreeSet::new();
        let mut telefones = BTreeSet::new();
        for lead in outcomes.iter().flatten() {
            if let Some(cnpj) = &lead.cnpj {
                cnpjs.insert(cnpj.clone());
            }
            if let Some(telefone) = &lead.telefone {
                telefones.insert(telefone.clone());
            }
        }
        let cnpjs: Vec<String> = cnpjs.into_iter().collect();
        let telefones: Vec<String> = telefones.into_iter().collect();

        let chunk_size = chunk_size.max(1);
        let chunks = cnpjs.len().max(telefones.len()).div_ceil(chunk_size);
        let mut index = HashMap::new();
        for chunk in 0..chunks {
            let window = |ids: &[String]| -> Vec<String> {
                ids.iter()
                    .skip(chunk * chunk_size)
                    .take(chunk_size)
                    .cloned()
                    .collect()
            };
            match self
                .store
                .list_by_identifiers(&window(&cnpjs), &window(&telefones))
                .await
            {
                Ok(found) => {
                    for lead in found {
                        for key in DedupKey::identifier_keys(&lead.to_normalized()) {
                            index.insert(key, lead.id);
                        }
                        leads.insert(lead.id, lead);
                    }
                }
                Err(e) => {
                    tracing::warn!("Prefetch failed, falling back to per-row lookups: {}", e);
                    leads.clear();
                    return None;
                }
            }
        }

        tracing::debug!(
            "Prefetched {} existing leads for {} cnpjs / {} phones in {} queries",
            leads.len(),
            cnpjs.len(),
            telefones.len(),
            chunks
        );
        Some(index)
    }

    async fn find_existing(&self, state: &mut BatchState, key: &DedupKey) -> Result<Option<Lead>, AppError> {
        if let Some(index) = &state.index {
            if key.kind() != DedupKind::RazaoSocialCidadeUf {
                return Ok(index.get(key).and_then(|id| state.leads.get(id)).cloned());
            }
        }

        let found = self.store.find_by_key(key).await?;
        if let Some(lead) = &found {
            state.remember(lead.clone());
        }
        Ok(found)
    }

    async fn resolve_row(
        &self,
        state: &mut BatchState,
        report: &mut ImportReport,
        lead: NormalizedLead,
        row: &RawRow,
        line: usize,
    ) {
        let key = dedup_key(&lead);

        if let Some(first) = state.seen.get(&key).copied() {
            self.merge_batch_duplicate(state, report, &lead, row, first, line)
                .await;
            return;
        }

        let existing = match self.find_existing(state, &key).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!("Lookup failed for {} (row {}): {}", key, line, e);
                state.seen.insert(key, None);
                report.push_error(row_error(line, &e, row));
                return;
            }
        };

        match existing {
            Some(existing) => {
                let outcome = merge_lead(&existing, &lead);
                state.seen.insert(key.clone(), Some(existing.id));
                if outcome.changed() {
                    if let Err(e) = self
                        .store
                        .update_details(existing.id, &outcome.lead.details)
                        .await
                    {
                        tracing::warn!("Update failed for lead {} (row {}): {}", existing.id, line, e);
                        report.push_error(row_error(line, &e, row));
                        return;
                    }
                    tracing::debug!(
                        "Row {} merged into lead {} ({}): {:?}",
                        line,
                        existing.id,
                        key,
                        outcome.filled_fields
                    );
                    state.remember(outcome.lead);
                }
                report.duplicados_atualizados += 1;
            }
            None => match self.store.insert(&lead).await {
                Ok(id) => {
                    tracing::debug!("Row {} inserted as lead {} ({})", line, id, key);
                    state.seen.insert(key, Some(id));
                    state.remember(Lead::from_insert(id, &lead));
                    report.novos_inseridos += 1;
                }
                Err(e) => {
                    tracing::warn!("Insert failed for {} (row {}): {}", key, line, e);
                    state.seen.insert(key, None);
                    report.push_error(row_error(line, &e, row));
                }
            },
        }
    }

    /// A later row with a key already resolved in this batch is folded into
    /// the lead the first occurrence resolved to.
    async fn merge_batch_duplicate(
        &self,
        state: &mut BatchState,
        report: &mut ImportReport,
        lead: &NormalizedLead,
        row: &RawRow,
        first: Option<i64>,
        line: usize,
    ) {
        let Some(current) = first.and_then(|id| state.leads.get(&id)) else {
            report.duplicados_ignorados += 1;
            return;
        };

        let outcome = merge_lead(current, lead);
        if !outcome.changed() {
            tracing::debug!("Row {} repeats lead {} within the batch, ignored", line, outcome.lead.id);
            report.duplicados_ignorados += 1;
            return;
        }

        match self
            .store
            .update_details(outcome.lead.id, &outcome.lead.details)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    "Row {} completed lead {} from the same batch: {:?}",
                    line,
                    outcome.lead.id,
                    outcome.filled_fields
                );
                state.remember(outcome.lead);
                report.duplicados_atualizados += 1;
            }
            Err(e) => {
                tracing::warn!("Update failed for lead {} (row {}): {}", outcome.lead.id, line, e);
                report.push_error(row_error(line, &e, row));
            }
        }
    }
}

/// Store failures are reported with the store's own message.
fn row_error(line: usize, err: &AppError, row: &RawRow) -> ErrorDetail {
    ErrorDetail {
        linha: line,
        razao: err.to_string(),
        dados: Some(row.clone()),
    }
}
