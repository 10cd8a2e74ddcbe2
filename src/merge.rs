//! Fill-if-empty merge of an imported lead into a stored one.
//!
//! Only the descriptive allow-list in [`LeadDetails`] is ever written.
//! Identity (`cnpj`, `telefone`, `razao_social`) and business state
//! (`claimed_by`, `claimed_at`, `status`) belong to other workflows.

use crate::models::{Lead, LeadDetails, NormalizedLead};

/// Result of merging an incoming lead into a stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub lead: Lead,
    /// Names of the fields that were filled, in allow-list order.
    pub filled_fields: Vec<&'static str>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.filled_fields.is_empty()
    }
}

fn is_missing(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

macro_rules! fill_missing {
    ($target:expr, $source:expr, $filled:expr; $($field:ident),+ $(,)?) => {
        $(
            if is_missing(&$target.$field) && !is_missing(&$source.$field) {
                $target.$field = $source.$field.clone();
                $filled.push(stringify!($field));
            }
        )+
    };
}

impl LeadDetails {
    /// Copies every field of `incoming` into `self` where `self` is empty.
    /// Returns the names of the fields that changed.
    pub fn fill_missing_from(&mut self, incoming: &LeadDetails) -> Vec<&'static str> {
        let mut filled = Vec::new();
        fill_missing!(self, incoming, filled;
            nome_fantasia,
            email,
            logradouro,
            numero,
            bairro,
            cep,
            municipio,
            uf,
            natureza_juridica,
            situacao,
            atividade_principal,
            capital_social,
            tipo,
            data_abertura,
        );
        filled
    }
}

/// Merges `incoming` into a copy of `existing`. Pure; the caller persists.
pub fn merge_lead(existing: &Lead, incoming: &NormalizedLead) -> MergeOutcome {
    let mut lead = existing.clone();
    let filled_fields = lead.details.fill_missing_from(&incoming.details);
    MergeOutcome {
        lead,
        filled_fields,
    }
}
