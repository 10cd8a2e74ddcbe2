//! Field normalizers for spreadsheet cells.
//!
//! Every function here is total: malformed input yields `None`, never a
//! panic. Whether a `None` rejects the row is decided by the validator.

fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// CNPJ: digits only, at least 11 digits. No truncation is applied.
///
/// ```
/// use rust_leads_api::normalize::normalize_tax_id;
/// assert_eq!(normalize_tax_id("12.345.678/0001-95").as_deref(), Some("12345678000195"));
/// assert_eq!(normalize_tax_id("123"), None);
/// ```
pub fn normalize_tax_id(raw: &str) -> Option<String> {
    let cleaned = digits(raw);
    if cleaned.len() < 11 {
        return None;
    }
    Some(cleaned)
}

/// Phone: digits only, DDD + number, so exactly 10 (landline) or 11 (mobile) digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let cleaned = digits(raw);
    match cleaned.len() {
        10 | 11 => Some(cleaned),
        _ => None,
    }
}

/// UF: trimmed, uppercase, exactly two characters.
pub fn normalize_state_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    if code.chars().count() == 2 {
        Some(code)
    } else {
        None
    }
}

/// Free text: trimmed, empty becomes `None`.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Municipality: trimmed text, uppercased so city names compare consistently.
pub fn normalize_city(raw: &str) -> Option<String> {
    normalize_text(raw).map(|city| city.to_uppercase())
}

/// CEP: digits only, exactly 8 digits.
pub fn normalize_postal_code(raw: &str) -> Option<String> {
    let cleaned = digits(raw);
    if cleaned.len() == 8 {
        Some(cleaned)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_id_keeps_long_values() {
        // CPF-sized ids are accepted, longer strings are not cut
        assert_eq!(normalize_tax_id("123.456.789-01").as_deref(), Some("12345678901"));
        assert_eq!(
            normalize_tax_id("123456789012345678").as_deref(),
            Some("123456789012345678")
        );
        assert_eq!(normalize_tax_id(""), None);
        assert_eq!(normalize_tax_id("abc"), None);
    }

    #[test]
    fn test_phone_length_bounds() {
        assert_eq!(normalize_phone("(11) 3333-4444").as_deref(), Some("1133334444"));
        assert_eq!(normalize_phone("(11) 91234-5678").as_deref(), Some("11912345678"));
        assert_eq!(normalize_phone("119123456"), None);
        assert_eq!(normalize_phone("+55 11 91234-5678"), None);
    }

    #[test]
    fn test_state_code() {
        assert_eq!(normalize_state_code(" sp ").as_deref(), Some("SP"));
        assert_eq!(normalize_state_code("SPX"), None);
        assert_eq!(normalize_state_code(""), None);
    }

    #[test]
    fn test_city_uppercases_accented_letters() {
        assert_eq!(normalize_city(" São Paulo ").as_deref(), Some("SÃO PAULO"));
        assert_eq!(normalize_city("   "), None);
    }

    #[test]
    fn test_postal_code() {
        assert_eq!(normalize_postal_code("01310-100").as_deref(), Some("01310100"));
        assert_eq!(normalize_postal_code("1310-100"), None);
    }
}
