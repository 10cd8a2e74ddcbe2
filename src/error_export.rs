use crate::errors::AppError;
use crate::models::ErrorDetail;

/// Header row of the error export, written unquoted.
pub const ERROR_CSV_HEADER: &str = "Linha,Razão do Erro,Dados";

/// Renders row errors as a downloadable CSV.
///
/// Every data field is double-quoted, embedded quotes are doubled and rows
/// are joined by `\n`. The `Dados` column holds the raw row as JSON. An empty
/// error list yields an empty string (no header).
pub fn errors_to_csv(errors: &[ErrorDetail]) -> Result<String, AppError> {
    if errors.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for error in errors {
        let dados = match &error.dados {
            Some(row) => serde_json::to_string(row).map_err(|e| {
                AppError::InternalError(format!("serialize row {}: {}", error.linha, e))
            })?,
            None => String::new(),
        };
        writer.write_record([error.linha.to_string(), error.razao.clone(), dados])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("flush error export: {}", e)))?;
    let body = String::from_utf8(bytes)
        .map_err(|e| AppError::InternalError(format!("error export is not UTF-8: {}", e)))?;
    Ok(format!("{}\n{}", ERROR_CSV_HEADER, body.trim_end_matches('\n')))
}
