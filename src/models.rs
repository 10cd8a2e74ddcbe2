use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use std::borrow::Cow;
use uuid::Uuid;

/// Lifecycle tag given to every lead created by an import.
pub const DEFAULT_LEAD_STATUS: &str = "novo";

// ============ Raw Spreadsheet Input ============

/// A single raw cell value as read from a spreadsheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawValue {
    /// Blank cell.
    #[default]
    Empty,
    /// Text cell.
    Text(String),
    /// Integer cell.
    Int(i64),
    /// Floating point cell (Excel stores every number this way).
    Float(f64),
    /// Boolean cell.
    Bool(bool),
}

impl RawValue {
    /// Renders the cell as text, or `None` when the cell is blank.
    ///
    /// Integral floats are rendered without a fractional part so that a CNPJ
    /// typed as a number (`11222333000144`) keeps its digits.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            RawValue::Empty => None,
            RawValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            RawValue::Int(i) => Some(Cow::Owned(i.to_string())),
            RawValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(Cow::Owned((*f as i64).to_string()))
                } else {
                    Some(Cow::Owned(f.to_string()))
                }
            }
            RawValue::Bool(b) => Some(Cow::Owned(b.to_string())),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawValue::Empty => serializer.serialize_none(),
            RawValue::Text(s) => serializer.serialize_str(s),
            RawValue::Int(i) => serializer.serialize_i64(*i),
            RawValue::Float(f) => serializer.serialize_f64(*f),
            RawValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

/// One data row of a spreadsheet: column header → raw value, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cell. Later cells with a header already present are kept but
    /// never win a lookup.
    pub fn push(&mut self, header: impl Into<String>, value: impl Into<RawValue>) {
        self.cells.push((header.into(), value.into()));
    }

    /// Builder form of [`RawRow::push`].
    pub fn with(mut self, header: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.push(header, value);
        self
    }

    /// Exact header lookup.
    pub fn get(&self, header: &str) -> Option<&RawValue> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v)
    }

    /// Looks a field up by any of its accepted header spellings.
    ///
    /// Aliases are tried in order; headers are compared trimmed and
    /// case-insensitively.
    pub fn find(&self, aliases: &[&str]) -> Option<&RawValue> {
        aliases.iter().find_map(|alias| {
            let alias = alias.to_lowercase();
            self.cells
                .iter()
                .find(|(h, _)| h.trim().to_lowercase() == alias)
                .map(|(_, v)| v)
        })
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.is_blank())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.cells.iter().map(|(h, v)| (h.as_str(), v))
    }
}

impl<H: Into<String>, V: Into<RawValue>> FromIterator<(H, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (H, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (header, value) in iter {
            row.push(header, value);
        }
        row
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (header, value) in &self.cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

// ============ Lead Models ============

/// Descriptive lead fields that an import may fill in on an existing lead.
///
/// This is the merge allow-list and doubles as the payload of a store update.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LeadDetails {
    /// Trade name.
    pub nome_fantasia: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Street.
    pub logradouro: Option<String>,
    /// Street number.
    pub numero: Option<String>,
    /// Neighborhood.
    pub bairro: Option<String>,
    /// Postal code (CEP), 8 digits.
    pub cep: Option<String>,
    /// Municipality, uppercase.
    pub municipio: Option<String>,
    /// State code, 2 uppercase letters.
    pub uf: Option<String>,
    /// Opening date as found in the source sheet.
    pub data_abertura: Option<String>,
    /// Legal nature.
    pub natureza_juridica: Option<String>,
    /// Registration status.
    pub situacao: Option<String>,
    /// Primary economic activity.
    pub atividade_principal: Option<String>,
    /// Share capital, kept as text.
    pub capital_social: Option<String>,
    /// Company type (e.g. "MATRIZ").
    pub tipo: Option<String>,
}

/// A lead as produced by the import validator, before it touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLead {
    /// CNPJ, digits only.
    pub cnpj: Option<String>,
    /// Phone, 10 or 11 digits.
    pub telefone: Option<String>,
    /// Legal name, never empty.
    pub razao_social: String,
    #[serde(flatten)]
    pub details: LeadDetails,
}

/// A stored lead.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub cnpj: Option<String>,
    pub telefone: Option<String>,
    pub razao_social: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub details: LeadDetails,
    /// Seller who claimed the lead, `None` while unclaimed.
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Lifecycle tag owned by the claiming workflow.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Builds the stored form of a freshly inserted lead.
    pub fn from_insert(id: i64, lead: &NormalizedLead) -> Self {
        let now = Utc::now();
        Self {
            id,
            cnpj: lead.cnpj.clone(),
            telefone: lead.telefone.clone(),
            razao_social: lead.razao_social.clone(),
            details: lead.details.clone(),
            claimed_by: None,
            claimed_at: None,
            status: DEFAULT_LEAD_STATUS.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The import-side view of this lead, used for key derivation.
    pub fn to_normalized(&self) -> NormalizedLead {
        NormalizedLead {
            cnpj: self.cnpj.clone(),
            telefone: self.telefone.clone(),
            razao_social: self.razao_social.clone(),
            details: self.details.clone(),
        }
    }
}

// ============ Import Report ============

/// A row that could not be imported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    /// Source line number (header is line 1).
    pub linha: usize,
    /// Human-readable reason.
    pub razao: String,
    /// The raw row as read from the file.
    pub dados: Option<RawRow>,
}

/// Outcome of one import batch.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Identifier used to fetch the report and its error export later.
    pub import_id: Uuid,
    /// Name of the imported file.
    pub arquivo_nome: String,
    pub total_linhas: usize,
    pub novos_inseridos: usize,
    pub duplicados_ignorados: usize,
    pub duplicados_atualizados: usize,
    pub erros_total: usize,
    pub erros_detalhes: Vec<ErrorDetail>,
    pub tempo_processamento_ms: u64,
    /// Set when the import was cancelled before the last row.
    pub cancelado: bool,
}

impl ImportReport {
    pub fn new(arquivo_nome: impl Into<String>, total_linhas: usize) -> Self {
        Self {
            import_id: Uuid::new_v4(),
            arquivo_nome: arquivo_nome.into(),
            total_linhas,
            novos_inseridos: 0,
            duplicados_ignorados: 0,
            duplicados_atualizados: 0,
            erros_total: 0,
            erros_detalhes: Vec::new(),
            tempo_processamento_ms: 0,
            cancelado: false,
        }
    }

    pub fn push_error(&mut self, error: ErrorDetail) {
        self.erros_detalhes.push(error);
        self.erros_total = self.erros_detalhes.len();
    }

    /// Rows that reached a final classification.
    pub fn rows_processed(&self) -> usize {
        self.novos_inseridos + self.duplicados_ignorados + self.duplicados_atualizados + self.erros_total
    }

    /// Short message suitable for display to the importing admin.
    pub fn summary(&self) -> String {
        let prefix = if self.cancelado {
            "Importação cancelada"
        } else {
            "Importação concluída"
        };
        format!(
            "{}! {} novos leads adicionados, {} atualizados, {} duplicados ignorados, {} erros.",
            prefix,
            self.novos_inseridos,
            self.duplicados_atualizados,
            self.duplicados_ignorados,
            self.erros_total
        )
    }
}

// ============ Import Audit Log ============

/// Audit entry written after every import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub arquivo_nome: String,
    /// SHA-256 of the uploaded bytes, hex encoded.
    pub arquivo_sha256: Option<String>,
    pub total_linhas: i32,
    pub novos_inseridos: i32,
    pub duplicados_ignorados: i32,
    pub duplicados_atualizados: i32,
    pub erros_total: i32,
    pub tempo_processamento_ms: i32,
    pub criado_em: DateTime<Utc>,
    /// Identity of the admin who ran the import.
    pub criado_por: Option<Uuid>,
}

impl ImportLogEntry {
    pub fn from_report(
        report: &ImportReport,
        arquivo_sha256: Option<String>,
        criado_por: Option<Uuid>,
    ) -> Self {
        let clamp = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
        Self {
            arquivo_nome: report.arquivo_nome.clone(),
            arquivo_sha256,
            total_linhas: clamp(report.total_linhas),
            novos_inseridos: clamp(report.novos_inseridos),
            duplicados_ignorados: clamp(report.duplicados_ignorados),
            duplicados_atualizados: clamp(report.duplicados_atualizados),
            erros_total: clamp(report.erros_total),
            tempo_processamento_ms: i32::try_from(report.tempo_processamento_ms).unwrap_or(i32::MAX),
            criado_em: Utc::now(),
            criado_por,
        }
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: i64,
    pub arquivo_nome: String,
    pub arquivo_sha256: Option<String>,
    pub total_linhas: i32,
    pub novos_inseridos: i32,
    pub duplicados_ignorados: i32,
    pub duplicados_atualizados: i32,
    pub erros_total: i32,
    pub tempo_processamento_ms: i32,
    pub criado_em: DateTime<Utc>,
    pub criado_por: Option<Uuid>,
}
