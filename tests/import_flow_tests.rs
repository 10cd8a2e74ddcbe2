/// End-to-end tests of the import pipeline against the in-memory store
/// Tests counters, row errors, merging, lookup strategies and cancellation
use async_trait::async_trait;
use rust_leads_api::dedup::DedupKey;
use rust_leads_api::errors::AppError;
use rust_leads_api::importer::{
    ImportCancellation, ImportRequest, LeadImporter, LookupStrategy,
};
use rust_leads_api::memory_store::{InMemoryAuditLog, InMemoryLeadStore};
use rust_leads_api::models::{
    ImportReport, Lead, LeadDetails, NormalizedLead, RawRow, RawValue,
};
use rust_leads_api::store::LeadStore;
use rust_leads_api::validator::{REASON_EMPTY_LEGAL_NAME, REASON_MISSING_IDENTIFIERS};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn row(cells: &[(&str, &str)]) -> RawRow {
    cells.iter().map(|(h, v)| (*h, *v)).collect()
}

fn stored_lead(id: i64, cnpj: Option<&str>, telefone: Option<&str>, razao: &str, details: LeadDetails) -> Lead {
    Lead::from_insert(
        id,
        &NormalizedLead {
            cnpj: cnpj.map(str::to_string),
            telefone: telefone.map(str::to_string),
            razao_social: razao.to_string(),
            details,
        },
    )
}

struct Harness {
    store: Arc<InMemoryLeadStore>,
    audit: Arc<InMemoryAuditLog>,
}

impl Harness {
    fn new() -> Self {
        Self::with_leads(Vec::new())
    }

    fn with_leads(leads: Vec<Lead>) -> Self {
        Self {
            store: Arc::new(InMemoryLeadStore::with_leads(leads)),
            audit: Arc::new(InMemoryAuditLog::new()),
        }
    }

    fn importer(&self, strategy: LookupStrategy) -> LeadImporter {
        LeadImporter::new(self.store.clone(), self.audit.clone()).with_strategy(strategy)
    }

    async fn import(&self, rows: Vec<RawRow>) -> ImportReport {
        self.import_with(LookupStrategy::PerRow, rows).await
    }

    async fn import_with(&self, strategy: LookupStrategy, rows: Vec<RawRow>) -> ImportReport {
        self.importer(strategy)
            .run(ImportRequest::new("leads.xlsx", rows), &ImportCancellation::new())
            .await
    }
}

#[cfg(test)]
mod counters_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_row_fills_lead_inserted_by_first() {
        let h = Harness::new();
        let report = h
            .import(vec![
                row(&[
                    ("Razão Social", "ACME LTDA"),
                    ("CNPJ", "11.222.333/0001-44"),
                    ("Telefone", "(11)91234-5678"),
                ]),
                row(&[
                    ("Razão Social", "ACME LTDA"),
                    ("CNPJ", "11222333000144"),
                    ("Município", "São Paulo"),
                ]),
            ])
            .await;

        assert_eq!(report.total_linhas, 2);
        assert_eq!(report.novos_inseridos, 1);
        assert_eq!(report.duplicados_atualizados, 1);
        assert_eq!(report.duplicados_ignorados, 0);
        assert_eq!(report.erros_total, 0);
        assert!(!report.cancelado);

        let leads = h.store.snapshot().await;
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].cnpj.as_deref(), Some("11222333000144"));
        assert_eq!(leads[0].telefone.as_deref(), Some("11912345678"));
        assert_eq!(leads[0].details.municipio.as_deref(), Some("SÃO PAULO"));
        assert_eq!(leads[0].status, "novo");
    }

    #[tokio::test]
    async fn test_exact_repeat_in_same_file_is_ignored() {
        let h = Harness::new();
        let acme = row(&[("Razão Social", "ACME LTDA"), ("Telefone", "(11) 3333-4444")]);
        let report = h.import(vec![acme.clone(), acme]).await;

        assert_eq!(report.novos_inseridos, 1);
        assert_eq!(report.duplicados_ignorados, 1);
        assert_eq!(report.duplicados_atualizados, 0);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_legal_name_reports_source_line() {
        let h = Harness::new();
        let report = h
            .import(vec![
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")]),
                row(&[("Razão Social", ""), ("Telefone", "(11) 91234-0000")]),
            ])
            .await;

        assert_eq!(report.erros_total, 1);
        assert_eq!(report.erros_detalhes.len(), 1);
        assert_eq!(report.erros_detalhes[0].linha, 3);
        assert_eq!(report.erros_detalhes[0].razao, REASON_EMPTY_LEGAL_NAME);
        assert_eq!(report.novos_inseridos, 1);
    }

    #[tokio::test]
    async fn test_every_row_is_classified_once() {
        let h = Harness::new();
        let report = h
            .import(vec![
                row(&[("Razão Social", "A"), ("CNPJ", "11222333000144")]),
                row(&[("Razão Social", "B"), ("CNPJ", "")]),
                row(&[("Razão Social", "A"), ("CNPJ", "11222333000144")]),
                row(&[("Razão Social", ""), ("CNPJ", "55666777000188")]),
                row(&[("Razão Social", "C"), ("Telefone", "2122223333")]),
            ])
            .await;

        assert_eq!(report.rows_processed(), report.total_linhas);
        assert_eq!(report.novos_inseridos, 2);
        assert_eq!(report.duplicados_ignorados, 1);
        assert_eq!(report.erros_total, 2);
        assert_eq!(report.erros_detalhes[0].razao, REASON_MISSING_IDENTIFIERS);
        assert_eq!(report.erros_detalhes[0].linha, 3);
        assert_eq!(report.erros_detalhes[1].linha, 5);
    }

    #[tokio::test]
    async fn test_reimport_inserts_nothing() {
        let h = Harness::new();
        let rows = vec![
            row(&[("Razão Social", "ACME LTDA"), ("CNPJ", "11222333000144")]),
            row(&[("Razão Social", "BETA ME"), ("Telefone", "(11) 3333-4444")]),
            row(&[("Razão Social", "GAMA SA"), ("CNPJ", "55.666.777/0001-88"), ("Email", "gama@x.com")]),
            row(&[("Razão Social", ""), ("CNPJ", "99888777000166")]),
        ];

        let first = h.import(rows.clone()).await;
        assert_eq!(first.novos_inseridos, 3);

        let second = h.import(rows).await;
        assert_eq!(second.novos_inseridos, 0);
        assert_eq!(second.duplicados_atualizados + second.duplicados_ignorados, 3);
        assert_eq!(second.erros_total, 1);
        assert_eq!(h.store.len().await, 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let h = Harness::new();
        let report = h.import(Vec::new()).await;

        assert_eq!(report.total_linhas, 0);
        assert_eq!(report.rows_processed(), 0);
        assert_eq!(h.audit.entries().await.len(), 1);
    }
}

#[cfg(test)]
mod merge_tests {
    use super::*;

    #[tokio::test]
    async fn test_business_fields_survive_import() {
        let seller = Uuid::new_v4();
        let mut claimed = stored_lead(
            7,
            Some("11222333000144"),
            Some("11912345678"),
            "ACME LTDA",
            LeadDetails {
                nome_fantasia: Some("Acme".to_string()),
                ..Default::default()
            },
        );
        claimed.claimed_by = Some(seller);
        claimed.claimed_at = Some(chrono::Utc::now());
        claimed.status = "em_negociacao".to_string();
        let h = Harness::with_leads(vec![claimed.clone()]);

        let report = h
            .import(vec![row(&[
                ("Razão Social", "ACME COMERCIO LTDA"),
                ("CNPJ", "11.222.333/0001-44"),
                ("Telefone", "(21) 98888-7777"),
                ("Nome Fantasia", "Outro Nome"),
                ("Email", "contato@acme.com.br"),
            ])])
            .await;
        assert_eq!(report.duplicados_atualizados, 1);

        let lead = &h.store.snapshot().await[0];
        assert_eq!(lead.details.email.as_deref(), Some("contato@acme.com.br"));
        assert_eq!(lead.details.nome_fantasia.as_deref(), Some("Acme"));
        assert_eq!(lead.razao_social, "ACME LTDA");
        assert_eq!(lead.telefone.as_deref(), Some("11912345678"));
        assert_eq!(lead.claimed_by, Some(seller));
        assert_eq!(lead.claimed_at, claimed.claimed_at);
        assert_eq!(lead.status, "em_negociacao");
    }

    #[tokio::test]
    async fn test_stored_match_with_nothing_to_fill_counts_as_updated() {
        let existing = stored_lead(
            1,
            Some("11222333000144"),
            None,
            "ACME LTDA",
            LeadDetails {
                email: Some("a@acme.com".to_string()),
                ..Default::default()
            },
        );
        let h = Harness::with_leads(vec![existing.clone()]);

        let report = h
            .import(vec![row(&[
                ("Razão Social", "ACME LTDA"),
                ("CNPJ", "11222333000144"),
                ("Email", "b@acme.com"),
            ])])
            .await;

        assert_eq!(report.duplicados_atualizados, 1);
        assert_eq!(report.novos_inseridos, 0);
        assert_eq!(h.store.snapshot().await[0].details, existing.details);
    }

    #[tokio::test]
    async fn test_fill_through_one_key_is_not_overwritten_through_another() {
        let h = Harness::with_leads(vec![stored_lead(
            1,
            Some("11222333000144"),
            Some("11912345678"),
            "ACME LTDA",
            LeadDetails::default(),
        )]);

        let report = h
            .import(vec![
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678"), ("Email", "first@acme.com")]),
                row(&[("Razão Social", "ACME LTDA"), ("CNPJ", "11222333000144"), ("Email", "second@acme.com")]),
            ])
            .await;

        assert_eq!(report.duplicados_atualizados, 2);
        let lead = &h.store.snapshot().await[0];
        assert_eq!(lead.details.email.as_deref(), Some("first@acme.com"));
    }

    #[tokio::test]
    async fn test_cnpj_wins_over_phone_match() {
        // Row's phone belongs to an existing lead, but its CNPJ is new: the
        // cascade stops at CNPJ and the insert clashes on the phone.
        let h = Harness::with_leads(vec![stored_lead(
            1,
            None,
            Some("11912345678"),
            "ACME LTDA",
            LeadDetails::default(),
        )]);

        let report = h
            .import(vec![row(&[
                ("Razão Social", "DELTA SA"),
                ("CNPJ", "55666777000188"),
                ("Telefone", "11912345678"),
            ])])
            .await;

        assert_eq!(report.novos_inseridos, 0);
        assert_eq!(report.erros_total, 1);
        assert!(report.erros_detalhes[0].razao.contains("Conflict"));
        assert_eq!(h.store.len().await, 1);
    }
}

#[cfg(test)]
mod strategy_tests {
    use super::*;

    fn existing() -> Vec<Lead> {
        vec![
            stored_lead(1, Some("11222333000144"), Some("11912345678"), "ACME LTDA", LeadDetails::default()),
            stored_lead(
                2,
                None,
                Some("2122223333"),
                "BETA ME",
                LeadDetails {
                    nome_fantasia: Some("Beta".to_string()),
                    ..Default::default()
                },
            ),
        ]
    }

    fn mixed_batch() -> Vec<RawRow> {
        vec![
            row(&[("Razão Social", "ACME LTDA"), ("CNPJ", "11222333000144"), ("Município", "Santos")]),
            row(&[("Razão Social", "NOVA LTDA"), ("Telefone", "(31) 3333-2222")]),
            row(&[("Razão Social", "NOVA LTDA"), ("Telefone", "3133332222"), ("Email", "nova@x.com")]),
            row(&[("Razão Social", ""), ("Telefone", "(41) 3333-1111")]),
            row(&[("Razão Social", "BETA ME"), ("Telefone", "(21) 2222-3333")]),
            row(&[("Razão Social", "DELTA SA"), ("CNPJ", "55666777000188"), ("Telefone", "11912345678")]),
            row(&[("Razão Social", "NOVA LTDA"), ("Telefone", "3133332222")]),
            row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678"), ("Email", "acme@x.com")]),
        ]
    }

    type LeadView = (i64, Option<String>, Option<String>, String, LeadDetails);

    async fn view(store: &InMemoryLeadStore) -> Vec<LeadView> {
        store
            .snapshot()
            .await
            .into_iter()
            .map(|l| (l.id, l.cnpj, l.telefone, l.razao_social, l.details))
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_batch_counters() {
        let h = Harness::with_leads(existing());
        let report = h.import(mixed_batch()).await;

        assert_eq!(report.novos_inseridos, 1);
        assert_eq!(report.duplicados_atualizados, 4);
        assert_eq!(report.duplicados_ignorados, 1);
        assert_eq!(report.erros_total, 2);
        assert_eq!(report.rows_processed(), 8);

        let acme = &h.store.snapshot().await[0];
        assert_eq!(acme.details.municipio.as_deref(), Some("SANTOS"));
        assert_eq!(acme.details.email.as_deref(), Some("acme@x.com"));
    }

    #[tokio::test]
    async fn test_prefetch_and_per_row_agree() {
        let per_row = Harness::with_leads(existing());
        let a = per_row.import_with(LookupStrategy::PerRow, mixed_batch()).await;

        for chunk_size in [1, 2, 500] {
            let prefetch = Harness::with_leads(existing());
            let b = prefetch
                .import_with(LookupStrategy::Prefetch { chunk_size }, mixed_batch())
                .await;

            assert_eq!(a.novos_inseridos, b.novos_inseridos);
            assert_eq!(a.duplicados_atualizados, b.duplicados_atualizados);
            assert_eq!(a.duplicados_ignorados, b.duplicados_ignorados);
            assert_eq!(a.erros_total, b.erros_total);
            assert_eq!(a.erros_detalhes, b.erros_detalhes);
            assert_eq!(view(&per_row.store).await, view(&prefetch.store).await);
        }
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_rejected_insert_is_a_row_error() {
        let h = Harness::new();
        h.store.reject_inserts_named("BETA ME").await;

        let report = h
            .import(vec![
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")]),
                row(&[("Razão Social", "BETA ME"), ("Telefone", "1133334444")]),
                row(&[("Razão Social", "GAMA SA"), ("Telefone", "2122223333")]),
            ])
            .await;

        assert_eq!(report.novos_inseridos, 2);
        assert_eq!(report.erros_total, 1);
        let err = &report.erros_detalhes[0];
        assert_eq!(err.linha, 3);
        assert!(err.razao.contains("insert rejected for BETA ME"));
        assert_eq!(
            err.dados.as_ref().and_then(|d| d.get("Razão Social")),
            Some(&RawValue::from("BETA ME"))
        );
    }

    #[tokio::test]
    async fn test_store_outage_fails_rows_not_batch() {
        let h = Harness::new();
        h.store.set_fail_writes(true);

        let report = h
            .import(vec![
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")]),
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")]),
                row(&[("Razão Social", "BETA ME"), ("Telefone", "1133334444")]),
            ])
            .await;

        assert_eq!(report.erros_total, 2);
        assert_eq!(report.duplicados_ignorados, 1);
        assert_eq!(report.rows_processed(), 3);
        assert!(report.erros_detalhes.iter().all(|e| e.razao.contains("store unavailable")));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_report() {
        let h = Harness::new();
        h.audit.set_failing(true);

        let report = h
            .import(vec![row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")])])
            .await;

        assert_eq!(report.novos_inseridos, 1);
        assert_eq!(report.erros_total, 0);
        assert!(h.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_audit_entry_mirrors_report() {
        let h = Harness::new();
        let admin = Uuid::new_v4();
        let request = ImportRequest::new(
            "janeiro.xlsx",
            vec![
                row(&[("Razão Social", "ACME LTDA"), ("Telefone", "11912345678")]),
                row(&[("Razão Social", ""), ("Telefone", "1133334444")]),
            ],
        )
        .imported_by(admin);

        let report = h
            .importer(LookupStrategy::PerRow)
            .run(request, &ImportCancellation::new())
            .await;

        let entries = h.audit.entries().await;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.arquivo_nome, "janeiro.xlsx");
        assert_eq!(entry.total_linhas, 2);
        assert_eq!(entry.novos_inseridos, 1);
        assert_eq!(entry.erros_total, 1);
        assert_eq!(entry.criado_por, Some(admin));
        assert_eq!(entry.arquivo_sha256, None);
        assert_eq!(report.arquivo_nome, "janeiro.xlsx");
    }
}

/// Cancels the import once a given number of leads has been inserted.
struct CancelAfterInserts {
    inner: InMemoryLeadStore,
    cancel: ImportCancellation,
    after: usize,
    inserts: AtomicUsize,
}

#[async_trait]
impl LeadStore for CancelAfterInserts {
    fn backend_tag(&self) -> &'static str {
        "cancelling"
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Lead>, AppError> {
        self.inner.find_by_key(key).await
    }

    async fn insert(&self, lead: &NormalizedLead) -> Result<i64, AppError> {
        let id = self.inner.insert(lead).await?;
        if self.inserts.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.cancel.cancel();
        }
        Ok(id)
    }

    async fn update_details(&self, id: i64, details: &LeadDetails) -> Result<(), AppError> {
        self.inner.update_details(id, details).await
    }

    async fn list_by_identifiers(
        &self,
        cnpjs: &[String],
        telefones: &[String],
    ) -> Result<Vec<Lead>, AppError> {
        self.inner.list_by_identifiers(cnpjs, telefones).await
    }
}

/// Applies `edit` to the stored leads right after the batch has prefetched
/// them, as a seller working the same leads during the import would.
struct EditedAfterPrefetch {
    inner: InMemoryLeadStore,
    edit: LeadDetails,
}

#[async_trait]
impl LeadStore for EditedAfterPrefetch {
    fn backend_tag(&self) -> &'static str {
        "edited"
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Lead>, AppError> {
        self.inner.find_by_key(key).await
    }

    async fn insert(&self, lead: &NormalizedLead) -> Result<i64, AppError> {
        self.inner.insert(lead).await
    }

    async fn update_details(&self, id: i64, details: &LeadDetails) -> Result<(), AppError> {
        self.inner.update_details(id, details).await
    }

    async fn list_by_identifiers(
        &self,
        cnpjs: &[String],
        telefones: &[String],
    ) -> Result<Vec<Lead>, AppError> {
        let found = self.inner.list_by_identifiers(cnpjs, telefones).await?;
        for lead in &found {
            self.inner.update_details(lead.id, &self.edit).await?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod concurrent_edit_tests {
    use super::*;

    #[tokio::test]
    async fn test_fields_filled_after_prefetch_are_kept() {
        let existing = stored_lead(1, Some("11222333000144"), None, "ACME LTDA", LeadDetails::default());
        let store = Arc::new(EditedAfterPrefetch {
            inner: InMemoryLeadStore::with_leads(vec![existing]),
            edit: LeadDetails {
                email: Some("vendedor@acme.com.br".to_string()),
                ..Default::default()
            },
        });
        let audit = Arc::new(InMemoryAuditLog::new());

        let report = LeadImporter::new(store.clone(), audit)
            .with_strategy(LookupStrategy::Prefetch { chunk_size: 100 })
            .run(
                ImportRequest::new(
                    "leads.xlsx",
                    vec![row(&[
                        ("Razão Social", "ACME LTDA"),
                        ("CNPJ", "11.222.333/0001-44"),
                        ("Email", "planilha@acme.com.br"),
                        ("Bairro", "Centro"),
                    ])],
                ),
                &ImportCancellation::new(),
            )
            .await;

        assert_eq!(report.duplicados_atualizados, 1);
        assert_eq!(report.erros_total, 0);

        let lead = &store.inner.snapshot().await[0];
        assert_eq!(lead.details.email.as_deref(), Some("vendedor@acme.com.br"));
        assert_eq!(lead.details.bairro.as_deref(), Some("Centro"));
    }
}

#[cfg(test)]
mod cancellation_tests {
    use super::*;

    fn five_rows() -> Vec<RawRow> {
        ["11912345671", "11912345672", "11912345673", "11912345674", "11912345675"]
            .iter()
            .map(|phone| row(&[("Razão Social", "LEAD"), ("Telefone", *phone)]))
            .collect()
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_yields_partial_report() {
        let cancel = ImportCancellation::new();
        let store = Arc::new(CancelAfterInserts {
            inner: InMemoryLeadStore::new(),
            cancel: cancel.clone(),
            after: 2,
            inserts: AtomicUsize::new(0),
        });
        let audit = Arc::new(InMemoryAuditLog::new());

        let report = LeadImporter::new(store.clone(), audit.clone())
            .run(ImportRequest::new("leads.xlsx", five_rows()), &cancel)
            .await;

        assert!(report.cancelado);
        assert_eq!(report.total_linhas, 5);
        assert_eq!(report.novos_inseridos, 2);
        assert_eq!(report.rows_processed(), 2);
        assert_eq!(store.inner.len().await, 2);

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].novos_inseridos, 2);
    }

    #[tokio::test]
    async fn test_cancel_before_start_processes_nothing() {
        let h = Harness::new();
        let cancel = ImportCancellation::new();
        cancel.cancel();

        let report = h
            .importer(LookupStrategy::Prefetch { chunk_size: 10 })
            .run(ImportRequest::new("leads.xlsx", five_rows()), &cancel)
            .await;

        assert!(report.cancelado);
        assert_eq!(report.rows_processed(), 0);
        assert!(h.store.is_empty().await);
        assert!(report.summary().starts_with("Importação cancelada"));
    }
}
