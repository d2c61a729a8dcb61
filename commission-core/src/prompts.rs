//! Carrier-specific prompt templates.
//!
//! Carrier names arrive as free text from upload forms and model output
//! ("United Healthcare", "UHC", "united-healthcare"). They are folded by
//! [`normalize_carrier_name`] and resolved once against an alias table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Carriers with dedicated prompt guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Carrier {
    /// No carrier-specific guidance.
    Generic,
    /// Aetna.
    Aetna,
    /// Anthem.
    Anthem,
    /// Blue Cross Blue Shield plans.
    BlueCrossBlueShield,
    /// Cigna.
    Cigna,
    /// Humana.
    Humana,
    /// `UnitedHealthcare`.
    UnitedHealthcare,
}

/// Normalized alias → carrier.
const ALIASES: &[(&str, Carrier)] = &[
    ("aetna", Carrier::Aetna),
    ("aetnainc", Carrier::Aetna),
    ("anthem", Carrier::Anthem),
    ("anthembluecross", Carrier::Anthem),
    ("elevancehealth", Carrier::Anthem),
    ("bcbs", Carrier::BlueCrossBlueShield),
    ("bluecross", Carrier::BlueCrossBlueShield),
    ("bluecrossblueshield", Carrier::BlueCrossBlueShield),
    ("cigna", Carrier::Cigna),
    ("cignahealthcare", Carrier::Cigna),
    ("humana", Carrier::Humana),
    ("uhc", Carrier::UnitedHealthcare),
    ("unitedhealthcare", Carrier::UnitedHealthcare),
    ("unitedhealthcareinc", Carrier::UnitedHealthcare),
    ("unitedhealthgroup", Carrier::UnitedHealthcare),
];

/// Folds case, whitespace, hyphens, underscores and punctuation.
///
/// ```
/// use commission_core::prompts::normalize_carrier_name;
///
/// assert_eq!(normalize_carrier_name("United-Healthcare, Inc."), "unitedhealthcareinc");
/// assert_eq!(normalize_carrier_name("  blue_cross BLUE shield "), "bluecrossblueshield");
/// ```
#[must_use]
pub fn normalize_carrier_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl Carrier {
    /// Resolves a free-text carrier name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let key = normalize_carrier_name(name);
        if key.is_empty() {
            return None;
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, carrier)| *carrier)
    }

    const fn guidance(self) -> &'static str {
        match self {
            Self::Generic => "",
            Self::Aetna => {
                "Aetna statements list each group on its own block with a group number above the \
                 table; carry the group number into every row of that block."
            }
            Self::Anthem => {
                "Anthem statements split commissions into New Business and Renewal sections; \
                 keep the section name in a Section column."
            }
            Self::BlueCrossBlueShield => {
                "BCBS statements repeat the column header on every page; do not emit repeated \
                 header rows as data."
            }
            Self::Cigna => {
                "Cigna statements print an Adjustments table after the detail table; extract it \
                 as a separate table."
            }
            Self::Humana => {
                "Humana statements show chargebacks in parentheses; keep the parentheses so the \
                 sign is preserved."
            }
            Self::UnitedHealthcare => {
                "UnitedHealthcare statements use Customer Name and Customer ID as the group \
                 identifiers and print a Writing Agent column."
            }
        }
    }
}

/// The three prompt variants used for one carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Full table-extraction prompt.
    pub standard: String,
    /// Short prompt for page-by-page fallback.
    pub compressed: String,
    /// First-page metadata prompt.
    pub metadata: String,
}

const BASE_STANDARD: &str = "Extract every table from these commission statement pages. \
Return a single JSON object with keys \"tables\" (each with \"headers\", \"rows\" and \
\"summary_rows\" as row indices), \"document_metadata\" (carrier_name, broker_company, \
statement_date, total_amount, each with a matching *_confidence between 0 and 1) and \
\"groups_and_companies\" (objects with at least \"name\"). Keep cell text exactly as printed; \
use null for empty cells. A table may continue from a previous page: include every row you see.";

const BASE_COMPRESSED: &str = "Single commission statement page. Return JSON only: \
{\"tables\":[{\"headers\":[],\"rows\":[]}],\"document_metadata\":{},\"groups_and_companies\":[]}. \
Cells verbatim, null when empty.";

const BASE_METADATA: &str = "Read the statement header. Return JSON only: \
{\"document_metadata\":{\"carrier_name\",\"carrier_confidence\",\"broker_company\",\
\"broker_confidence\",\"statement_date\",\"date_confidence\",\"total_amount\",\
\"total_amount_confidence\"}}.";

impl PromptTemplate {
    /// Builds the built-in template for `carrier`.
    #[must_use]
    pub fn builtin(carrier: Carrier) -> Self {
        let guidance = carrier.guidance();
        let with_guidance = |base: &str| {
            if guidance.is_empty() {
                base.to_string()
            } else {
                format!("{base}\n\nCarrier notes: {guidance}")
            }
        };
        Self {
            standard: with_guidance(BASE_STANDARD),
            compressed: BASE_COMPRESSED.to_string(),
            metadata: with_guidance(BASE_METADATA),
        }
    }
}

/// Registry of prompt templates keyed by canonical carrier.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: HashMap<Carrier, PromptTemplate>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        let templates = [
            Carrier::Generic,
            Carrier::Aetna,
            Carrier::Anthem,
            Carrier::BlueCrossBlueShield,
            Carrier::Cigna,
            Carrier::Humana,
            Carrier::UnitedHealthcare,
        ]
        .into_iter()
        .map(|c| (c, PromptTemplate::builtin(c)))
        .collect();
        Self { templates }
    }
}

impl PromptRegistry {
    /// Replaces the template for `carrier`.
    pub fn register(&mut self, carrier: Carrier, template: PromptTemplate) {
        self.templates.insert(carrier, template);
    }

    /// Template for a canonical carrier, falling back to the generic one.
    #[must_use]
    pub fn template(&self, carrier: Carrier) -> &PromptTemplate {
        self.templates
            .get(&carrier)
            .or_else(|| self.templates.get(&Carrier::Generic))
            .unwrap_or_else(|| generic_template())
    }

    /// Template for a free-text carrier name; unknown or missing names get the generic one.
    #[must_use]
    pub fn lookup(&self, name: Option<&str>) -> &PromptTemplate {
        let carrier = name.and_then(Carrier::from_name).unwrap_or(Carrier::Generic);
        self.template(carrier)
    }
}

fn generic_template() -> &'static PromptTemplate {
    static GENERIC: std::sync::OnceLock<PromptTemplate> = std::sync::OnceLock::new();
    GENERIC.get_or_init(|| PromptTemplate::builtin(Carrier::Generic))
}
