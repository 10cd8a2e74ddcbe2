//! Turns one raw spreadsheet row into a [`NormalizedLead`] or an [`ErrorDetail`].

use crate::models::{ErrorDetail, LeadDetails, NormalizedLead, RawRow};
use crate::normalize::{
    normalize_city, normalize_phone, normalize_postal_code, normalize_state_code,
    normalize_tax_id, normalize_text,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub const REASON_EMPTY_LEGAL_NAME: &str = "Razão Social vazia";
pub const REASON_MISSING_IDENTIFIERS: &str = "CNPJ e Telefone vazios ou inválidos";

/// Accepted header spellings for each lead field. Lookup is trim- and
/// case-insensitive; the first alias present in the row wins.
pub mod columns {
    pub const CNPJ: &[&str] = &["CNPJ", "cnpj"];
    pub const TELEFONE: &[&str] = &["Telefone", "telefone", "Fone"];
    pub const RAZAO_SOCIAL: &[&str] = &["Razão Social", "Razao Social", "razao_social"];
    pub const NOME_FANTASIA: &[&str] = &["Nome Fantasia", "nome_fantasia"];
    pub const EMAIL: &[&str] = &["Email", "E-mail"];
    pub const LOGRADOURO: &[&str] = &["Logradouro", "Endereço", "Endereco"];
    pub const NUMERO: &[&str] = &["Número", "Numero", "Nº"];
    pub const BAIRRO: &[&str] = &["Bairro"];
    pub const CEP: &[&str] = &["CEP"];
    pub const MUNICIPIO: &[&str] = &["Município", "Municipio", "Cidade"];
    pub const UF: &[&str] = &["UF", "Estado"];
    pub const DATA_ABERTURA: &[&str] = &["Data de Abertura", "Data Abertura", "data_abertura"];
    pub const NATUREZA_JURIDICA: &[&str] =
        &["Natureza Jurídica", "Natureza Juridica", "natureza_juridica"];
    pub const SITUACAO: &[&str] = &["Situação", "Situacao"];
    pub const ATIVIDADE_PRINCIPAL: &[&str] =
        &["Atividade Principal", "atividade_principal", "CNAE Principal"];
    pub const CAPITAL_SOCIAL: &[&str] = &["Capital Social", "capital_social"];
    pub const TIPO: &[&str] = &["Tipo"];
}

fn field(row: &RawRow, aliases: &[&str], normalize: fn(&str) -> Option<String>) -> Option<String> {
    row.find(aliases)
        .and_then(|value| value.as_text())
        .and_then(|text| normalize(&text))
}

fn invalid(line: usize, reason: impl Into<String>, row: &RawRow) -> ErrorDetail {
    ErrorDetail {
        linha: line,
        razao: reason.into(),
        dados: Some(row.clone()),
    }
}

fn build(row: &RawRow, line: usize) -> Result<NormalizedLead, ErrorDetail> {
    let Some(razao_social) = field(row, columns::RAZAO_SOCIAL, normalize_text) else {
        return Err(invalid(line, REASON_EMPTY_LEGAL_NAME, row));
    };

    let cnpj = field(row, columns::CNPJ, normalize_tax_id);
    let telefone = field(row, columns::TELEFONE, normalize_phone);
    if cnpj.is_none() && telefone.is_none() {
        return Err(invalid(line, REASON_MISSING_IDENTIFIERS, row));
    }

    let details = LeadDetails {
        nome_fantasia: field(row, columns::NOME_FANTASIA, normalize_text),
        email: field(row, columns::EMAIL, normalize_text),
        logradouro: field(row, columns::LOGRADOURO, normalize_text),
        numero: field(row, columns::NUMERO, normalize_text),
        bairro: field(row, columns::BAIRRO, normalize_text),
        cep: field(row, columns::CEP, normalize_postal_code),
        municipio: field(row, columns::MUNICIPIO, normalize_city),
        uf: field(row, columns::UF, normalize_state_code),
        data_abertura: field(row, columns::DATA_ABERTURA, normalize_text),
        natureza_juridica: field(row, columns::NATUREZA_JURIDICA, normalize_text),
        situacao: field(row, columns::SITUACAO, normalize_text),
        atividade_principal: field(row, columns::ATIVIDADE_PRINCIPAL, normalize_text),
        capital_social: field(row, columns::CAPITAL_SOCIAL, normalize_text),
        tipo: field(row, columns::TIPO, normalize_text),
    };

    Ok(NormalizedLead {
        cnpj,
        telefone,
        razao_social,
        details,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Erro desconhecido".to_string()
    }
}

/// Validates and normalizes one row.
///
/// Returns exactly one of a lead or an error detail. A panic raised while
/// building the lead is turned into an error for this row instead of
/// unwinding into the import loop.
///
/// # Arguments
///
/// * `row` - The raw row, header → cell.
/// * `line` - Source line number of the row (the header is line 1).
pub fn build_lead(row: &RawRow, line: usize) -> Result<NormalizedLead, ErrorDetail> {
    build_isolated(row, line, build)
}

fn build_isolated<F>(row: &RawRow, line: usize, build: F) -> Result<NormalizedLead, ErrorDetail>
where
    F: FnOnce(&RawRow, usize) -> Result<NormalizedLead, ErrorDetail>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| build(row, line))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("Row {} could not be processed: {}", line, message);
            Err(invalid(
                line,
                format!("Erro ao processar linha: {}", message),
                row,
            ))
        }
    }
}
