use sqlx::{postgres::PgPoolOptions, PgPool};

/// Tables owned by the import workflow. Idempotent.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id BIGSERIAL PRIMARY KEY,
    cnpj VARCHAR(32) UNIQUE,
    telefone VARCHAR(11) UNIQUE,
    razao_social VARCHAR(255) NOT NULL,
    nome_fantasia VARCHAR(255),
    email VARCHAR(255),
    logradouro VARCHAR(255),
    numero VARCHAR(20),
    bairro VARCHAR(100),
    cep VARCHAR(8),
    municipio VARCHAR(100),
    uf VARCHAR(2),
    data_abertura VARCHAR(20),
    natureza_juridica VARCHAR(255),
    situacao VARCHAR(50),
    atividade_principal TEXT,
    capital_social VARCHAR(100),
    tipo VARCHAR(50),
    claimed_by UUID,
    claimed_at TIMESTAMPTZ,
    status VARCHAR(50) NOT NULL DEFAULT 'novo',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_leads_razao_social ON leads (UPPER(TRIM(razao_social)));
CREATE INDEX IF NOT EXISTS idx_leads_municipio_uf ON leads (municipio, uf);
CREATE INDEX IF NOT EXISTS idx_leads_status ON leads (status);
CREATE INDEX IF NOT EXISTS idx_leads_claimed_by ON leads (claimed_by);

CREATE TABLE IF NOT EXISTS import_logs (
    id BIGSERIAL PRIMARY KEY,
    arquivo_nome VARCHAR(255) NOT NULL,
    arquivo_sha256 VARCHAR(64),
    total_linhas INTEGER NOT NULL,
    novos_inseridos INTEGER NOT NULL,
    duplicados_ignorados INTEGER NOT NULL,
    duplicados_atualizados INTEGER NOT NULL,
    erros_total INTEGER NOT NULL,
    tempo_processamento_ms INTEGER NOT NULL,
    criado_em TIMESTAMPTZ NOT NULL,
    criado_por UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_import_logs_criado_em ON import_logs (criado_em);
"#;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the `leads` and `import_logs` tables when missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        tracing::info!("Database schema verified (leads, import_logs)");
        Ok(())
    }
}
