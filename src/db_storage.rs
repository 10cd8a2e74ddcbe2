use crate::circuit_breaker::{counts_as_failure, create_store_circuit_breaker, StoreCircuitBreaker};
use crate::dedup::DedupKey;
use crate::errors::{AppError, ResultExt};
use crate::models::{ImportLog, ImportLogEntry, Lead, LeadDetails, NormalizedLead, DEFAULT_LEAD_STATUS};
use crate::store::{AuditLogSink, LeadStore};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use sqlx::PgPool;
use std::future::Future;

/// PostgreSQL-backed lead store.
///
/// Every query goes through a circuit breaker so that an import against an
/// unreachable database fails fast instead of timing out row by row.
pub struct PgLeadStore {
    pool: PgPool,
    breaker: StoreCircuitBreaker,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_store_circuit_breaker(),
        }
    }

    async fn guarded<T, F>(&self, operation: &'static str, query: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.breaker.call_with(counts_as_failure, query).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Lead store circuit open, rejecting {}", operation);
                Err(AppError::InternalError(format!(
                    "{}: lead store temporarily unavailable",
                    operation
                )))
            }
        }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn find_by_key(&self, key: &DedupKey) -> Result<Option<Lead>, AppError> {
        let pool = &self.pool;
        self.guarded("find_by_key", async move {
            let found = match key {
                DedupKey::Cnpj(cnpj) => {
                    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE cnpj = $1 LIMIT 1")
                        .bind(cnpj)
                        .fetch_optional(pool)
                        .await
                }
                DedupKey::Telefone(telefone) => {
                    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE telefone = $1 LIMIT 1")
                        .bind(telefone)
                        .fetch_optional(pool)
                        .await
                }
                DedupKey::RazaoCidadeUf {
                    razao_social,
                    municipio,
                    uf,
                } => {
                    sqlx::query_as::<_, Lead>(
                        r#"
                        SELECT * FROM leads
                        WHERE UPPER(TRIM(razao_social)) = $1
                          AND UPPER(TRIM(COALESCE(municipio, ''))) = $2
                          AND COALESCE(uf, '') = $3
                        ORDER BY id
                        LIMIT 1
                        "#,
                    )
                    .bind(razao_social)
                    .bind(municipio)
                    .bind(uf)
                    .fetch_optional(pool)
                    .await
                }
            };
            found.with_context(|| format!("find lead by {}", key))
        })
        .await
    }

    async fn insert(&self, lead: &NormalizedLead) -> Result<i64, AppError> {
        let pool = &self.pool;
        self.guarded("insert", async move {
            let d = &lead.details;
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO leads (
                    cnpj, telefone, razao_social, nome_fantasia, email,
                    logradouro, numero, bairro, cep, municipio, uf,
                    data_abertura, natureza_juridica, situacao,
                    atividade_principal, capital_social, tipo, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                RETURNING id
                "#,
            )
            .bind(&lead.cnpj)
            .bind(&lead.telefone)
            .bind(&lead.razao_social)
            .bind(&d.nome_fantasia)
            .bind(&d.email)
            .bind(&d.logradouro)
            .bind(&d.numero)
            .bind(&d.bairro)
            .bind(&d.cep)
            .bind(&d.municipio)
            .bind(&d.uf)
            .bind(&d.data_abertura)
            .bind(&d.natureza_juridica)
            .bind(&d.situacao)
            .bind(&d.atividade_principal)
            .bind(&d.capital_social)
            .bind(&d.tipo)
            .bind(DEFAULT_LEAD_STATUS)
            .fetch_one(pool)
            .await
            .map_err(AppError::from)
        })
        .await
    }

    /// Fill-only in SQL: a column is written only while it is NULL or blank.
    async fn update_details(&self, id: i64, details: &LeadDetails) -> Result<(), AppError> {
        let pool = &self.pool;
        self.guarded("update_details", async move {
            let result = sqlx::query(
                r#"
                UPDATE leads
                SET nome_fantasia = CASE WHEN TRIM(COALESCE(nome_fantasia, '')) = '' THEN $2 ELSE nome_fantasia END,
                    email = CASE WHEN TRIM(COALESCE(email, '')) = '' THEN $3 ELSE email END,
                    logradouro = CASE WHEN TRIM(COALESCE(logradouro, '')) = '' THEN $4 ELSE logradouro END,
                    numero = CASE WHEN TRIM(COALESCE(numero, '')) = '' THEN $5 ELSE numero END,
                    bairro = CASE WHEN TRIM(COALESCE(bairro, '')) = '' THEN $6 ELSE bairro END,
                    cep = CASE WHEN TRIM(COALESCE(cep, '')) = '' THEN $7 ELSE cep END,
                    municipio = CASE WHEN TRIM(COALESCE(municipio, '')) = '' THEN $8 ELSE municipio END,
                    uf = CASE WHEN TRIM(COALESCE(uf, '')) = '' THEN $9 ELSE uf END,
                    data_abertura = CASE WHEN TRIM(COALESCE(data_abertura, '')) = '' THEN $10 ELSE data_abertura END,
                    natureza_juridica = CASE WHEN TRIM(COALESCE(natureza_juridica, '')) = '' THEN $11 ELSE natureza_juridica END,
                    situacao = CASE WHEN TRIM(COALESCE(situacao, '')) = '' THEN $12 ELSE situacao END,
                    atividade_principal = CASE WHEN TRIM(COALESCE(atividade_principal, '')) = '' THEN $13 ELSE atividade_principal END,
                    capital_social = CASE WHEN TRIM(COALESCE(capital_social, '')) = '' THEN $14 ELSE capital_social END,
                    tipo = CASE WHEN TRIM(COALESCE(tipo, '')) = '' THEN $15 ELSE tipo END,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&details.nome_fantasia)
            .bind(&details.email)
            .bind(&details.logradouro)
            .bind(&details.numero)
            .bind(&details.bairro)
            .bind(&details.cep)
            .bind(&details.municipio)
            .bind(&details.uf)
            .bind(&details.data_abertura)
            .bind(&details.natureza_juridica)
            .bind(&details.situacao)
            .bind(&details.atividade_principal)
            .bind(&details.capital_social)
            .bind(&details.tipo)
            .execute(pool)
            .await
            .with_context(|| format!("update lead {}", id))?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("lead {} not found", id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_by_identifiers(
        &self,
        cnpjs: &[String],
        telefones: &[String],
    ) -> Result<Vec<Lead>, AppError> {
        if cnpjs.is_empty() && telefones.is_empty() {
            return Ok(Vec::new());
        }
        let pool = &self.pool;
        self.guarded("list_by_identifiers", async move {
            sqlx::query_as::<_, Lead>(
                "SELECT * FROM leads WHERE cnpj = ANY($1) OR telefone = ANY($2)",
            )
            .bind(cnpjs)
            .bind(telefones)
            .fetch_all(pool)
            .await
            .context("list leads by identifiers")
        })
        .await
    }
}

/// Audit log stored in the `import_logs` table.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogSink for PgAuditLog {
    async fn append(&self, entry: &ImportLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO import_logs (
                arquivo_nome, arquivo_sha256, total_linhas, novos_inseridos,
                duplicados_ignorados, duplicados_atualizados, erros_total,
                tempo_processamento_ms, criado_em, criado_por
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.arquivo_nome)
        .bind(&entry.arquivo_sha256)
        .bind(entry.total_linhas)
        .bind(entry.novos_inseridos)
        .bind(entry.duplicados_ignorados)
        .bind(entry.duplicados_atualizados)
        .bind(entry.erros_total)
        .bind(entry.tempo_processamento_ms)
        .bind(entry.criado_em)
        .bind(entry.criado_por)
        .execute(&self.pool)
        .await
        .context("append import log")?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ImportLog>, AppError> {
        sqlx::query_as::<_, ImportLog>(
            r#"
            SELECT id, arquivo_nome, arquivo_sha256, total_linhas, novos_inseridos,
                   duplicados_ignorados, duplicados_atualizados, erros_total,
                   tempo_processamento_ms, criado_em, criado_por
            FROM import_logs
            ORDER BY criado_em DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list import logs")
    }
}
