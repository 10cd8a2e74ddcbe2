//! Deduplication keys.
//!
//! A lead is identified by a strict cascade: CNPJ, then phone, then legal
//! name + city + state. The first present identifier decides the key; fields
//! are never combined.

use crate::models::NormalizedLead;
use serde::Serialize;
use std::fmt;

/// Which identifier produced a [`DedupKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKind {
    Cnpj,
    Telefone,
    RazaoSocialCidadeUf,
}

impl DedupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupKind::Cnpj => "cnpj",
            DedupKind::Telefone => "telefone",
            DedupKind::RazaoSocialCidadeUf => "razao_social_cidade_uf",
        }
    }
}

/// Lookup key of a lead, both against the store and within one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Cnpj(String),
    Telefone(String),
    /// Upper-cased, trimmed name and city plus the state code; absent parts are empty.
    RazaoCidadeUf {
        razao_social: String,
        municipio: String,
        uf: String,
    },
}

impl DedupKey {
    pub fn kind(&self) -> DedupKind {
        match self {
            DedupKey::Cnpj(_) => DedupKind::Cnpj,
            DedupKey::Telefone(_) => DedupKind::Telefone,
            DedupKey::RazaoCidadeUf { .. } => DedupKind::RazaoSocialCidadeUf,
        }
    }

    /// Keys under which an already stored lead can be found by cnpj or phone
    /// lookups. A lead with a CNPJ is reachable through both.
    pub fn identifier_keys(lead: &NormalizedLead) -> Vec<DedupKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(cnpj) = &lead.cnpj {
            keys.push(DedupKey::Cnpj(cnpj.clone()));
        }
        if let Some(telefone) = &lead.telefone {
            keys.push(DedupKey::Telefone(telefone.clone()));
        }
        keys
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Cnpj(cnpj) => write!(f, "cnpj:{}", cnpj),
            DedupKey::Telefone(telefone) => write!(f, "telefone:{}", telefone),
            DedupKey::RazaoCidadeUf {
                razao_social,
                municipio,
                uf,
            } => write!(f, "razao_cidade_uf:{}|{}|{}", razao_social, municipio, uf),
        }
    }
}

/// Derives the deduplication key of a lead.
pub fn dedup_key(lead: &NormalizedLead) -> DedupKey {
    if let Some(cnpj) = &lead.cnpj {
        return DedupKey::Cnpj(cnpj.clone());
    }
    if let Some(telefone) = &lead.telefone {
        return DedupKey::Telefone(telefone.clone());
    }

    let upper_trim = |value: Option<&str>| value.unwrap_or("").trim().to_uppercase();
    DedupKey::RazaoCidadeUf {
        razao_social: upper_trim(Some(lead.razao_social.as_str())),
        municipio: upper_trim(lead.details.municipio.as_deref()),
        uf: lead.details.uf.clone().unwrap_or_default(),
    }
}
